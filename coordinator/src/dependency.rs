use std::time::Duration;

use storm_common::Error;
use storm_types::{ClusterPhase, TopologyPhase, WorkerPoolPhase};

use crate::lookup::ResourceLookup;

const CHECK_INTERVAL: Duration = Duration::from_secs(15);
const BLOCKED_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Required,
    Optional,
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Cluster,
    Topology,
    WorkerPool,
}

#[derive(Debug, Clone)]
pub struct DependencyRef {
    pub resource_type: ResourceType,
    pub namespace: String,
    pub name: String,
    pub required_phase: String,
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Satisfied,
    Pending,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependencyOutcome {
    pub status: DependencyStatus,
    pub recommended_wait: Duration,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchDependencyOutcome {
    pub satisfied: bool,
    pub recommended_wait: Duration,
    pub per_dependency: Vec<(String, DependencyOutcome)>,
}

/// Resolves `{type, name, namespace, requiredPhase, kind}` dependency
/// declarations into `{Satisfied, Pending, Failed, Blocked}` (spec.md
/// §4.6). Generic over `ResourceLookup` so reconcilers inject a real
/// Kubernetes-backed lookup while tests inject an in-memory fake.
pub struct DependencyManager<L: ResourceLookup> {
    lookup: std::sync::Arc<L>,
}

impl<L: ResourceLookup> DependencyManager<L> {
    pub fn new(lookup: std::sync::Arc<L>) -> Self {
        Self { lookup }
    }

    pub async fn check(&self, dep: &DependencyRef) -> Result<DependencyOutcome, Error> {
        let (phase, terminal_failure) = match dep.resource_type {
            ResourceType::Cluster => {
                let Some(cluster) = self.lookup.get_cluster(&dep.namespace, &dep.name).await? else {
                    return Ok(failed("referenced cluster not found"));
                };
                let phase = cluster.status.unwrap_or_default().phase;
                (phase.to_string(), phase == ClusterPhase::Failed)
            }
            ResourceType::Topology => {
                let Some(topology) = self.lookup.get_topology(&dep.namespace, &dep.name).await? else {
                    return Ok(failed("referenced topology not found"));
                };
                let phase = topology.status.unwrap_or_default().phase;
                (phase.to_string(), phase == TopologyPhase::Failed)
            }
            ResourceType::WorkerPool => {
                let Some(pool) = self.lookup.get_worker_pool(&dep.namespace, &dep.name).await? else {
                    return Ok(failed("referenced worker pool not found"));
                };
                let phase = pool.status.unwrap_or_default().phase;
                (phase.to_string(), phase == WorkerPoolPhase::Failed)
            }
        };

        if phase == dep.required_phase {
            return Ok(DependencyOutcome {
                status: DependencyStatus::Satisfied,
                recommended_wait: Duration::ZERO,
                reason: None,
            });
        }

        if terminal_failure {
            return Ok(match dep.kind {
                DependencyKind::Required | DependencyKind::Blocking => DependencyOutcome {
                    status: DependencyStatus::Blocked,
                    recommended_wait: BLOCKED_WAIT,
                    reason: Some(format!("dependency is in terminal failure phase {phase}")),
                },
                DependencyKind::Optional => failed(&format!("dependency is in terminal failure phase {phase}")),
            });
        }

        Ok(DependencyOutcome {
            status: DependencyStatus::Pending,
            recommended_wait: CHECK_INTERVAL,
            reason: Some(format!("waiting for phase {} (currently {phase})", dep.required_phase)),
        })
    }

    /// Aggregate: satisfied iff all `Required` dependencies are Satisfied;
    /// wait is the max among pending/failed-Required waits, widened to the
    /// 5-minute Blocking wait if any Blocking dependency is unsatisfied.
    pub async fn check_all(&self, deps: &[DependencyRef]) -> Result<BatchDependencyOutcome, Error> {
        let mut per_dependency = Vec::with_capacity(deps.len());
        let mut satisfied = true;
        let mut wait = Duration::ZERO;

        for dep in deps {
            let outcome = self.check(dep).await?;
            if dep.kind == DependencyKind::Required && outcome.status != DependencyStatus::Satisfied {
                satisfied = false;
                wait = wait.max(outcome.recommended_wait);
            }
            if dep.kind == DependencyKind::Blocking && outcome.status != DependencyStatus::Satisfied {
                wait = wait.max(BLOCKED_WAIT);
            }
            per_dependency.push((dep.name.clone(), outcome));
        }

        Ok(BatchDependencyOutcome { satisfied, recommended_wait: wait, per_dependency })
    }
}

fn failed(reason: &str) -> DependencyOutcome {
    DependencyOutcome {
        status: DependencyStatus::Failed,
        recommended_wait: Duration::ZERO,
        reason: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::fake::FakeResourceLookup;
    use std::sync::Arc;
    use storm_types::{StormCluster, StormClusterStatus};

    fn cluster(namespace: &str, name: &str, phase: ClusterPhase) -> StormCluster {
        let mut c = StormCluster::new(
            name,
            storm_types::StormClusterSpec {
                image: "storm:2.8.1".into(),
                nimbus: Default::default(),
                supervisor: Default::default(),
                ui: Default::default(),
                zookeeper: storm_types::ZookeeperSpec {
                    servers: vec!["zookeeper:2181".into()],
                    root: "/storm".into(),
                    connect_timeout_ms: 15000,
                    session_timeout_ms: 20000,
                },
                storm_config: Default::default(),
            },
        );
        c.metadata.namespace = Some(namespace.to_string());
        c.status = Some(StormClusterStatus { phase, ..Default::default() });
        c
    }

    #[tokio::test]
    async fn missing_resource_is_failed() {
        let lookup = Arc::new(FakeResourceLookup::default());
        let mgr = DependencyManager::new(lookup);
        let dep = DependencyRef {
            resource_type: ResourceType::Cluster,
            namespace: "ns".into(),
            name: "missing".into(),
            required_phase: "Running".into(),
            kind: DependencyKind::Required,
        };
        let outcome = mgr.check(&dep).await.unwrap();
        assert_eq!(outcome.status, DependencyStatus::Failed);
    }

    #[tokio::test]
    async fn matching_phase_is_satisfied() {
        let lookup = Arc::new(FakeResourceLookup::default());
        lookup.clusters.lock().unwrap().push(cluster("ns", "c1", ClusterPhase::Running));
        let mgr = DependencyManager::new(lookup);
        let dep = DependencyRef {
            resource_type: ResourceType::Cluster,
            namespace: "ns".into(),
            name: "c1".into(),
            required_phase: "Running".into(),
            kind: DependencyKind::Required,
        };
        let outcome = mgr.check(&dep).await.unwrap();
        assert_eq!(outcome.status, DependencyStatus::Satisfied);
    }

    #[tokio::test]
    async fn terminal_failure_on_required_dependency_is_blocked_with_five_minute_wait() {
        let lookup = Arc::new(FakeResourceLookup::default());
        lookup.clusters.lock().unwrap().push(cluster("ns", "c1", ClusterPhase::Failed));
        let mgr = DependencyManager::new(lookup);
        let dep = DependencyRef {
            resource_type: ResourceType::Cluster,
            namespace: "ns".into(),
            name: "c1".into(),
            required_phase: "Running".into(),
            kind: DependencyKind::Required,
        };
        let outcome = mgr.check(&dep).await.unwrap();
        assert_eq!(outcome.status, DependencyStatus::Blocked);
        assert_eq!(outcome.recommended_wait, BLOCKED_WAIT);
    }

    #[tokio::test]
    async fn batch_is_satisfied_only_when_all_required_are_satisfied() {
        let lookup = Arc::new(FakeResourceLookup::default());
        lookup.clusters.lock().unwrap().push(cluster("ns", "c1", ClusterPhase::Running));
        lookup.clusters.lock().unwrap().push(cluster("ns", "c2", ClusterPhase::Pending));
        let mgr = DependencyManager::new(lookup);
        let deps = vec![
            DependencyRef {
                resource_type: ResourceType::Cluster,
                namespace: "ns".into(),
                name: "c1".into(),
                required_phase: "Running".into(),
                kind: DependencyKind::Required,
            },
            DependencyRef {
                resource_type: ResourceType::Cluster,
                namespace: "ns".into(),
                name: "c2".into(),
                required_phase: "Running".into(),
                kind: DependencyKind::Required,
            },
        ];
        let batch = mgr.check_all(&deps).await.unwrap();
        assert!(!batch.satisfied);
    }
}
