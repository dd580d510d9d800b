use std::sync::Arc;

use chrono::{DateTime, Utc};
use storm_common::Error;
use storm_types::{ClusterPhase, TopologyPhase, WorkerPoolPhase};

use crate::lookup::ResourceLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueType {
    Resource,
    Capacity,
    Performance,
    Availability,
}

#[derive(Debug, Clone)]
pub struct CriticalIssue {
    pub severity: IssueSeverity,
    pub issue_type: IssueType,
    pub component: String,
    pub description: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub auto_recoverable: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryCounts {
    pub healthy: i32,
    pub total: i32,
}

impl CategoryCounts {
    fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.healthy as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub score: i32,
    pub overall: OverallHealth,
    pub issues: Vec<CriticalIssue>,
}

/// Weighted score across resource categories, penalized per critical
/// issue, clamped to [0, 100] (spec.md §4.7). A pure function so the
/// "Health score bounds" universal invariant (spec.md §8) can be property-
/// tested directly.
pub fn compute_system_health(
    clusters: CategoryCounts,
    topologies: CategoryCounts,
    pools: CategoryCounts,
    issues: Vec<CriticalIssue>,
) -> SystemHealth {
    let raw = clusters.ratio() * 50.0 + topologies.ratio() * 30.0 + pools.ratio() * 20.0;
    let penalized = raw - (issues.len() as f64 * 5.0);
    let score = penalized.clamp(0.0, 100.0).round() as i32;
    let overall = if score >= 90 {
        OverallHealth::Healthy
    } else if score >= 70 {
        OverallHealth::Degraded
    } else {
        OverallHealth::Unhealthy
    };
    SystemHealth { score, overall, issues }
}

/// Gathers cluster/topology/pool state across a namespace and turns it
/// into a `SystemHealth` snapshot, feeding the auto-recovery engine
/// (spec.md §4.7, §4.8).
pub struct CrossResourceMonitor<L: ResourceLookup> {
    lookup: Arc<L>,
    /// `stormConfig["recovery.cascade.failed-over-running-ratio"]`,
    /// operator-configurable (default 1.0); see resolved Open Question 3.
    cascade_ratio: f64,
}

impl<L: ResourceLookup> CrossResourceMonitor<L> {
    pub fn new(lookup: Arc<L>, cascade_ratio: f64) -> Self {
        Self { lookup, cascade_ratio }
    }

    pub async fn evaluate(&self, namespace: &str) -> Result<SystemHealth, Error> {
        let clusters = self.lookup.list_clusters(namespace).await?;
        let topologies = self.lookup.list_topologies(namespace).await?;
        let pools = self.lookup.list_worker_pools(namespace).await?;
        let now = Utc::now();

        let mut issues = Vec::new();

        let cluster_counts = CategoryCounts {
            healthy: clusters
                .iter()
                .filter(|c| c.status.as_ref().map(|s| s.phase) == Some(ClusterPhase::Running))
                .count() as i32,
            total: clusters.len() as i32,
        };
        for cluster in &clusters {
            if cluster.status.as_ref().map(|s| s.phase) == Some(ClusterPhase::Failed) {
                let name = cluster.metadata.name.clone().unwrap_or_default();
                issues.push(CriticalIssue {
                    severity: IssueSeverity::Critical,
                    issue_type: IssueType::Resource,
                    component: name.clone(),
                    description: format!("cluster {name} is unhealthy"),
                    first_seen: now,
                    last_seen: now,
                    auto_recoverable: true,
                });
            }
        }

        let topology_counts = CategoryCounts {
            healthy: topologies
                .iter()
                .filter(|t| t.status.as_ref().map(|s| s.phase) == Some(TopologyPhase::Running))
                .count() as i32,
            total: topologies.len() as i32,
        };
        for cluster in &clusters {
            let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
            let running = topologies
                .iter()
                .filter(|t| t.spec.cluster_ref == cluster_name && t.status.as_ref().map(|s| s.phase) == Some(TopologyPhase::Running))
                .count() as f64;
            let failed = topologies
                .iter()
                .filter(|t| t.spec.cluster_ref == cluster_name && t.status.as_ref().map(|s| s.phase) == Some(TopologyPhase::Failed))
                .count() as f64;
            if running + failed > 0.0 && failed > running * self.cascade_ratio {
                issues.push(CriticalIssue {
                    severity: IssueSeverity::Critical,
                    issue_type: IssueType::Availability,
                    component: cluster_name.clone(),
                    description: format!(
                        "{failed} failed topologies vs {running} running on cluster {cluster_name} (cascade heuristic)"
                    ),
                    first_seen: now,
                    last_seen: now,
                    auto_recoverable: false,
                });
            }
        }

        let pool_counts = CategoryCounts {
            healthy: pools
                .iter()
                .filter(|p| p.status.as_ref().map(|s| s.phase) == Some(WorkerPoolPhase::Ready))
                .count() as i32,
            total: pools.len() as i32,
        };

        Ok(compute_system_health(cluster_counts, topology_counts, pool_counts, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_always_in_bounds() {
        for h in 0..=4 {
            for t in 0..=4 {
                for issue_count in 0..=6 {
                    let issues = (0..issue_count)
                        .map(|_| CriticalIssue {
                            severity: IssueSeverity::Low,
                            issue_type: IssueType::Resource,
                            component: "x".into(),
                            description: "x".into(),
                            first_seen: Utc::now(),
                            last_seen: Utc::now(),
                            auto_recoverable: true,
                        })
                        .collect();
                    let health = compute_system_health(
                        CategoryCounts { healthy: h, total: 4 },
                        CategoryCounts { healthy: t, total: 4 },
                        CategoryCounts { healthy: h, total: 4 },
                        issues,
                    );
                    assert!((0..=100).contains(&health.score));
                }
            }
        }
    }

    #[test]
    fn all_healthy_no_issues_is_healthy_overall() {
        let health = compute_system_health(
            CategoryCounts { healthy: 2, total: 2 },
            CategoryCounts { healthy: 2, total: 2 },
            CategoryCounts { healthy: 2, total: 2 },
            vec![],
        );
        assert_eq!(health.score, 100);
        assert_eq!(health.overall, OverallHealth::Healthy);
    }

    #[test]
    fn empty_category_counts_as_fully_healthy_ratio() {
        let health = compute_system_health(
            CategoryCounts { healthy: 0, total: 0 },
            CategoryCounts { healthy: 0, total: 0 },
            CategoryCounts { healthy: 0, total: 0 },
            vec![],
        );
        assert_eq!(health.score, 100);
    }

    #[tokio::test]
    async fn monitor_flags_failed_cluster_and_cascade_heuristic() {
        use crate::lookup::fake::FakeResourceLookup;
        use storm_types::{
            JarSpec, StormCluster, StormClusterSpec, StormClusterStatus, StormTopology, StormTopologySpec,
            StormTopologyStatus, TopologyPhase,
        };

        let lookup = Arc::new(FakeResourceLookup::default());
        let mut cluster = StormCluster::new(
            "c1",
            StormClusterSpec {
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
        cluster.metadata.namespace = Some("ns".into());
        cluster.status = Some(StormClusterStatus { phase: ClusterPhase::Failed, ..Default::default() });
        lookup.clusters.lock().unwrap().push(cluster);

        for (name, phase) in [("t1", TopologyPhase::Failed), ("t2", TopologyPhase::Failed), ("t3", TopologyPhase::Running)] {
            let mut t = StormTopology::new(
                name,
                StormTopologySpec {
                    cluster_ref: "c1".into(),
                    jar: JarSpec::default(),
                    main_class: "com.ex.Main".into(),
                    args: vec![],
                    storm_config: Default::default(),
                    workers: Default::default(),
                    lifecycle: Default::default(),
                },
            );
            t.metadata.namespace = Some("ns".into());
            t.status = Some(StormTopologyStatus { phase, ..Default::default() });
            lookup.topologies.lock().unwrap().push(t);
        }

        let monitor = CrossResourceMonitor::new(lookup, 1.0);
        let health = monitor.evaluate("ns").await.unwrap();
        assert!(health.issues.iter().any(|i| i.issue_type == IssueType::Resource));
        assert!(health.issues.iter().any(|i| i.issue_type == IssueType::Availability));
    }
}
