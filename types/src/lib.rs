use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

mod config_value;
pub use config_value::{render_storm_yaml, to_json_value, ConfigMap, ConfigValue};

pub const FINALIZER: &str = "storm.apache.org/finalizer";
pub const RESTART_ANNOTATION: &str = "storm.apache.org/restart-requested";
pub const SPEC_HASH_ANNOTATION: &str = "storm.apache.org/spec-hash";

fn default_nimbus_replicas() -> i32 {
    1
}
fn default_supervisor_replicas() -> i32 {
    1
}
fn default_slots_per_supervisor() -> i32 {
    4
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout_ms() -> u32 {
    15_000
}
fn default_session_timeout_ms() -> u32 {
    20_000
}
fn default_kill_wait_seconds() -> u32 {
    30
}

// ---------------------------------------------------------------------
// StormCluster
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ZookeeperSpec {
    pub servers: Vec<String>,
    #[serde(default)]
    pub root: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u32,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NimbusSpec {
    #[serde(default = "default_nimbus_replicas")]
    pub replicas: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SupervisorSpec {
    #[serde(default = "default_supervisor_replicas")]
    pub replicas: i32,
    #[serde(default = "default_slots_per_supervisor")]
    pub slots_per_supervisor: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct UiSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl Default for UiSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu: None,
            memory: None,
        }
    }
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "storm.apache.org",
    version = "v1beta1",
    kind = "StormCluster",
    plural = "stormclusters",
    shortname = "stormcluster",
    derive = "PartialEq",
    status = "StormClusterStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".status.phase", "name": "PHASE", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.nimbusReady", "name": "NIMBUS", "type": "integer"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.supervisorReady", "name": "SUPERVISORS", "type": "integer"}"#)]
pub struct StormClusterSpec {
    pub image: String,
    #[serde(default)]
    pub nimbus: NimbusSpec,
    #[serde(default)]
    pub supervisor: SupervisorSpec,
    #[serde(default)]
    pub ui: UiSpec,
    pub zookeeper: ZookeeperSpec,
    #[serde(default)]
    pub storm_config: ConfigMap,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema, Default)]
pub enum ClusterPhase {
    #[default]
    Unknown,
    Pending,
    Creating,
    Running,
    Updating,
    Failed,
    Terminating,
}

impl FromStr for ClusterPhase {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Self::Unknown),
            "Pending" => Ok(Self::Pending),
            "Creating" => Ok(Self::Creating),
            "Running" => Ok(Self::Running),
            "Updating" => Ok(Self::Updating),
            "Failed" => Ok(Self::Failed),
            "Terminating" => Ok(Self::Terminating),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct StormClusterStatus {
    pub phase: ClusterPhase,
    #[serde(default)]
    pub nimbus_ready: i32,
    #[serde(default)]
    pub supervisor_ready: i32,
    #[serde(default)]
    pub ui_ready: bool,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Endpoint hints for clients wanting to reach Nimbus/UI directly.
    pub nimbus_endpoint: Option<String>,
    pub ui_endpoint: Option<String>,
    /// Consecutive reconciles during which a required component has been
    /// observed at zero ready replicas; used to debounce Running -> Failed.
    #[serde(default)]
    pub zero_ready_streak: u32,
}

// ---------------------------------------------------------------------
// StormTopology
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ChecksumSpec {
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ChecksumAlgorithm {
    Sha256,
    Md5,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ExtractionMode {
    #[default]
    Job,
    InitContainer,
    Sidecar,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ContainerJarSpec {
    pub image: String,
    pub path: String,
    #[serde(default)]
    pub extraction_mode: ExtractionMode,
    #[serde(default)]
    pub pull_secrets: Vec<String>,
    pub checksum: Option<ChecksumSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct UrlJarSpec {
    pub url: String,
    pub checksum: Option<ChecksumSpec>,
}

/// Exactly one of `url`, `container`, `inline` must be set; validated by
/// the topology reconciler's Validate step, not by the schema (the schema
/// cannot express "exactly one of" across optional fields portably).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct JarSpec {
    pub url: Option<UrlJarSpec>,
    pub container: Option<ContainerJarSpec>,
    /// Base64-encoded JAR bytes.
    pub inline: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum UpdateStrategy {
    #[default]
    KillThenResubmit,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct LifecycleSpec {
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    #[serde(default = "default_kill_wait_seconds")]
    pub kill_wait_seconds: u32,
}

impl Default for LifecycleSpec {
    fn default() -> Self {
        Self {
            update_strategy: UpdateStrategy::default(),
            kill_wait_seconds: default_kill_wait_seconds(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct WorkerSizing {
    pub replicas: Option<i32>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub heap_mb: Option<u32>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "storm.apache.org",
    version = "v1beta1",
    kind = "StormTopology",
    plural = "stormtopologies",
    shortname = "stormtopology",
    derive = "PartialEq",
    status = "StormTopologyStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".status.phase", "name": "PHASE", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.lastSubmittedVersion", "name": "VERSION", "type": "string"}"#)]
pub struct StormTopologySpec {
    pub cluster_ref: String,
    pub jar: JarSpec,
    pub main_class: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub storm_config: ConfigMap,
    #[serde(default)]
    pub workers: WorkerSizing,
    #[serde(default)]
    pub lifecycle: LifecycleSpec,
}

impl StormTopologySpec {
    pub fn version(&self) -> Option<&str> {
        self.storm_config.get("topology.version").and_then(ConfigValue::as_str)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema, Default)]
pub enum TopologyPhase {
    #[default]
    Unknown,
    Pending,
    Validating,
    Downloading,
    Submitting,
    Running,
    Suspended,
    Updating,
    Killing,
    Killed,
    Failed,
}

impl FromStr for TopologyPhase {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Self::Unknown),
            "Pending" => Ok(Self::Pending),
            "Validating" => Ok(Self::Validating),
            "Downloading" => Ok(Self::Downloading),
            "Submitting" => Ok(Self::Submitting),
            "Running" => Ok(Self::Running),
            "Suspended" => Ok(Self::Suspended),
            "Updating" => Ok(Self::Updating),
            "Killing" => Ok(Self::Killing),
            "Killed" => Ok(Self::Killed),
            "Failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TopologyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct StormTopologyStatus {
    pub phase: TopologyPhase,
    pub last_submitted_version: Option<String>,
    pub storm_topology_id: Option<String>,
    pub last_transition_time: Option<Time>,
    pub failure_reason: Option<String>,
    pub jar_path: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub uptime_seconds: Option<u64>,
    pub num_workers: Option<i32>,
    pub num_executors: Option<i32>,
    pub num_tasks: Option<i32>,
}

// ---------------------------------------------------------------------
// StormWorkerPool
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PodTemplateOverride {
    pub cpu: Option<String>,
    pub memory: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<String>,
    pub container_image_override: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "storm.apache.org",
    version = "v1beta1",
    kind = "StormWorkerPool",
    plural = "stormworkerpools",
    shortname = "stormworkerpool",
    derive = "PartialEq",
    status = "StormWorkerPoolStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".status.phase", "name": "PHASE", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.readyReplicas", "name": "READY", "type": "integer"}"#)]
pub struct StormWorkerPoolSpec {
    pub topology_ref: String,
    pub cluster_ref: String,
    pub replicas: i32,
    #[serde(default)]
    pub template: PodTemplateOverride,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema, Default)]
pub enum WorkerPoolPhase {
    #[default]
    Unknown,
    Pending,
    Creating,
    Ready,
    Scaling,
    Updating,
    Draining,
    Deleting,
    Deleted,
    Failed,
}

impl FromStr for WorkerPoolPhase {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Self::Unknown),
            "Pending" => Ok(Self::Pending),
            "Creating" => Ok(Self::Creating),
            "Ready" => Ok(Self::Ready),
            "Scaling" => Ok(Self::Scaling),
            "Updating" => Ok(Self::Updating),
            "Draining" => Ok(Self::Draining),
            "Deleting" => Ok(Self::Deleting),
            "Deleted" => Ok(Self::Deleted),
            "Failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WorkerPoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct StormWorkerPoolStatus {
    pub phase: WorkerPoolPhase,
    #[serde(default)]
    pub desired_replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ---------------------------------------------------------------------
// Status condition helpers shared across the three kinds
// ---------------------------------------------------------------------

pub const COND_READY: &str = "Ready";
pub const COND_DEPENDENCIES_MET: &str = "DependenciesMet";
pub const COND_CLUSTER_REACHABLE: &str = "ClusterReachable";
pub const COND_SUBMISSION_SUCCEEDED: &str = "SubmissionSucceeded";
pub const COND_VALIDATION_PASSED: &str = "ValidationPassed";

pub fn condition(
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    now: Time,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now,
        observed_generation: None,
    }
}

pub fn upsert_condition(conditions: &mut Vec<Condition>, new: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) {
        if existing.status != new.status {
            existing.last_transition_time = new.last_transition_time;
        }
        existing.status = new.status;
        existing.reason = new.reason;
        existing.message = new.message;
    } else {
        conditions.push(new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_from_str_round_trips_display() {
        for phase in [
            ClusterPhase::Unknown,
            ClusterPhase::Running,
            ClusterPhase::Failed,
        ] {
            let s = phase.to_string();
            assert_eq!(ClusterPhase::from_str(&s).unwrap(), phase);
        }
    }

    #[test]
    fn upsert_condition_updates_existing_type_in_place() {
        let mut conditions = Vec::new();
        let t0 = Time(chrono::Utc::now());
        upsert_condition(
            &mut conditions,
            condition(COND_READY, false, "NotReady", "not ready yet", t0.clone()),
        );
        assert_eq!(conditions.len(), 1);
        upsert_condition(
            &mut conditions,
            condition(COND_READY, true, "Ready", "all good", t0),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "True");
    }

    #[test]
    fn topology_version_reads_from_storm_config() {
        let mut spec = StormTopologySpec {
            cluster_ref: "c1".into(),
            jar: JarSpec::default(),
            main_class: "com.ex.Main".into(),
            args: vec![],
            storm_config: ConfigMap::new(),
            workers: WorkerSizing::default(),
            lifecycle: LifecycleSpec::default(),
        };
        assert_eq!(spec.version(), None);
        spec.storm_config
            .insert("topology.version".into(), ConfigValue::String("1.0.0".into()));
        assert_eq!(spec.version(), Some("1.0.0"));
    }
}
