pub mod dependency;
pub mod health;
pub mod lookup;
pub mod provisioner;
pub mod recovery;
pub mod system_health;

pub use dependency::{BatchDependencyOutcome, DependencyKind, DependencyManager, DependencyOutcome, DependencyRef, DependencyStatus, ResourceType};
pub use health::{available_slots, component_status, evaluate_cluster_health, ready_for_new_topology, ClusterHealth, ClusterHealthInputs, ComponentStatus};
pub use lookup::{KubeResourceLookup, ResourceLookup};
pub use provisioner::{decide_provisioning, ProvisioningDecision, ProvisionerInputs, ResourceRequirement, SynthesizedPoolSpec};
pub use recovery::{build_recovery_plan, ActionResult, ActionRisk, AutoRecoveryEngine, PlanExecutionRecord, Priority, RecoveryAction, RecoveryExecutor, RecoveryPlan};
pub use system_health::{compute_system_health, CategoryCounts, CriticalIssue, CrossResourceMonitor, IssueSeverity, IssueType, OverallHealth, SystemHealth};
