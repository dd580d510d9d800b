//! Operator-wide configuration: defaults merged into every reconciled spec
//! (spec.md §4.4 step 2, §6 "Operator configuration"). Loaded from a named
//! ConfigMap at startup, falling back to built-in defaults when the
//! ConfigMap is absent.

use std::collections::BTreeMap;

use kube::api::Api;
use serde::{Deserialize, Serialize};
use storm_types::ConfigMap as StormConfigMap;

use storm_common::Error;

fn default_image() -> String {
    "storm:2.8.1".to_string()
}
fn default_zookeeper_servers() -> Vec<String> {
    vec!["zookeeper:2181".to_string()]
}
fn default_connect_timeout_ms() -> u32 {
    15_000
}
fn default_session_timeout_ms() -> u32 {
    20_000
}
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
fn default_cascade_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZookeeperDefaults {
    #[serde(default = "default_zookeeper_servers")]
    pub servers: Vec<String>,
    #[serde(default = "default_connect_timeout_ms", rename = "connectTimeoutMs")]
    pub connect_timeout_ms: u32,
    #[serde(default = "default_session_timeout_ms", rename = "sessionTimeoutMs")]
    pub session_timeout_ms: u32,
}

impl Default for ZookeeperDefaults {
    fn default() -> Self {
        Self {
            servers: default_zookeeper_servers(),
            connect_timeout_ms: default_connect_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimbusDefaults {
    #[serde(default = "default_nimbus_replicas")]
    pub replicas: i32,
}

impl Default for NimbusDefaults {
    fn default() -> Self {
        Self { replicas: default_nimbus_replicas() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorDefaults {
    #[serde(default = "default_supervisor_replicas")]
    pub replicas: i32,
    #[serde(default = "default_slots_per_supervisor", rename = "slotsPerSupervisor")]
    pub slots_per_supervisor: i32,
}

impl Default for SupervisorDefaults {
    fn default() -> Self {
        Self { replicas: default_supervisor_replicas(), slots_per_supervisor: default_slots_per_supervisor() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiDefaults {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for UiDefaults {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Built-in defaults, used verbatim when `storm-operator-config` is absent
/// (spec.md §6), and merged field-by-field into specs that leave a field
/// empty (spec.md §4.4 step 2: "defaults never override non-empty spec
/// fields").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default = "default_image", rename = "defaultImage")]
    pub default_image: String,
    #[serde(default)]
    pub zookeeper: ZookeeperDefaults,
    #[serde(default)]
    pub nimbus: NimbusDefaults,
    #[serde(default)]
    pub supervisor: SupervisorDefaults,
    #[serde(default)]
    pub ui: UiDefaults,
    #[serde(default, rename = "stormConfig")]
    pub storm_config: StormConfigMap,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            default_image: default_image(),
            zookeeper: ZookeeperDefaults::default(),
            nimbus: NimbusDefaults::default(),
            supervisor: SupervisorDefaults::default(),
            ui: UiDefaults::default(),
            storm_config: StormConfigMap::new(),
        }
    }
}

impl OperatorConfig {
    /// `stormConfig["recovery.cascade.failed-over-running-ratio"]`,
    /// operator-configurable per §9 Open Question 3, default 1.0.
    pub fn cascade_ratio(&self) -> f64 {
        self.storm_config
            .get("recovery.cascade.failed-over-running-ratio")
            .and_then(|v| match v {
                storm_types::ConfigValue::Float(f) => Some(*f),
                storm_types::ConfigValue::Int(i) => Some(*i as f64),
                _ => None,
            })
            .unwrap_or_else(default_cascade_ratio)
    }

    fn from_configmap_data(data: &BTreeMap<String, String>) -> Result<Self, Error> {
        let raw = data
            .get("config.yaml")
            .ok_or_else(|| Error::UserInput("storm-operator-config missing key config.yaml".into()))?;
        Ok(serde_yaml::from_str(raw).map_err(|e| Error::UserInput(format!("invalid operator config: {e}")))?)
    }

    /// Loads `{namespace}/storm-operator-config`; returns built-in defaults
    /// when the ConfigMap does not exist (spec.md §6: "Missing configmap
    /// ⇒ use built-in defaults").
    pub async fn load(client: kube::Client, namespace: &str) -> Result<Self, Error> {
        let api: Api<k8s_openapi::api::core::v1::ConfigMap> = Api::namespaced(client, namespace);
        match api.get_opt("storm-operator-config").await? {
            Some(cm) => match cm.data {
                Some(data) => Self::from_configmap_data(&data),
                None => Ok(Self::default()),
            },
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_builtin_defaults() {
        let cfg = OperatorConfig::default();
        assert_eq!(cfg.default_image, "storm:2.8.1");
        assert_eq!(cfg.zookeeper.servers, vec!["zookeeper:2181".to_string()]);
        assert_eq!(cfg.zookeeper.connect_timeout_ms, 15_000);
        assert_eq!(cfg.zookeeper.session_timeout_ms, 20_000);
        assert_eq!(cfg.nimbus.replicas, 1);
        assert_eq!(cfg.supervisor.replicas, 1);
        assert_eq!(cfg.supervisor.slots_per_supervisor, 4);
        assert!(cfg.ui.enabled);
        assert_eq!(cfg.cascade_ratio(), 1.0);
    }

    #[test]
    fn parses_documented_configmap_yaml_shape() {
        let yaml = r#"
defaultImage: storm:2.8.2
zookeeper:
  servers: ["zk-0:2181", "zk-1:2181"]
  connectTimeoutMs: 20000
  sessionTimeoutMs: 25000
nimbus:
  replicas: 3
supervisor:
  replicas: 5
  slotsPerSupervisor: 8
ui:
  enabled: false
stormConfig: {}
"#;
        let cfg: OperatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.default_image, "storm:2.8.2");
        assert_eq!(cfg.zookeeper.servers.len(), 2);
        assert_eq!(cfg.nimbus.replicas, 3);
        assert_eq!(cfg.supervisor.slots_per_supervisor, 8);
        assert!(!cfg.ui.enabled);
    }

    #[test]
    fn cascade_ratio_reads_configured_override() {
        let mut cfg = OperatorConfig::default();
        cfg.storm_config.insert(
            "recovery.cascade.failed-over-running-ratio".into(),
            storm_types::ConfigValue::Float(2.5),
        );
        assert_eq!(cfg.cascade_ratio(), 2.5);
    }
}
