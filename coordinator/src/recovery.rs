use std::time::Duration;

use async_trait::async_trait;
use storm_common::Error;
use tokio_util::sync::CancellationToken;

use crate::system_health::{IssueSeverity, IssueType, SystemHealth};

pub const RECOVERY_BACKOFF_BASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionRisk {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Stamps `storm.apache.org/restart-requested` on the target CR; the
    /// owning reconciler performs the restart on its next reconcile
    /// (spec.md §4.8: "no out-of-band mutation").
    Restart { target: String },
    Scale { target: String, increment: i32 },
    Repair { target: String, advisory: String },
    Alert { target: String, message: String },
}

impl RecoveryAction {
    fn risk(&self) -> ActionRisk {
        match self {
            RecoveryAction::Restart { .. } => ActionRisk::High,
            RecoveryAction::Scale { .. } => ActionRisk::Medium,
            RecoveryAction::Repair { .. } => ActionRisk::Low,
            RecoveryAction::Alert { .. } => ActionRisk::Low,
        }
    }

    fn estimated_duration(&self) -> Duration {
        match self {
            RecoveryAction::Restart { .. } => Duration::from_secs(60),
            RecoveryAction::Scale { .. } => Duration::from_secs(120),
            RecoveryAction::Repair { .. } => Duration::from_secs(30),
            RecoveryAction::Alert { .. } => Duration::from_secs(1),
        }
    }

    pub fn target(&self) -> &str {
        match self {
            RecoveryAction::Restart { target }
            | RecoveryAction::Scale { target, .. }
            | RecoveryAction::Repair { target, .. }
            | RecoveryAction::Alert { target, .. } => target,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub action: RecoveryAction,
    pub risk: ActionRisk,
    pub estimated_duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    pub actions: Vec<PlannedAction>,
    pub risk: ActionRisk,
    pub priority: Priority,
    /// Plans at `risk >= High` or `priority == Critical` are not executed
    /// automatically (spec.md §4.8).
    pub requires_approval: bool,
}

/// Builds a recovery plan from a `SystemHealth` snapshot (spec.md §4.8).
/// Action mapping: Resource+auto-recoverable ⇒ Restart; Capacity+auto-
/// recoverable ⇒ Scale; Performance+auto-recoverable ⇒ Repair; anything
/// else ⇒ Alert.
pub fn build_recovery_plan(health: &SystemHealth) -> RecoveryPlan {
    let actions: Vec<PlannedAction> = health
        .issues
        .iter()
        .map(|issue| {
            let action = match (issue.issue_type, issue.auto_recoverable) {
                (IssueType::Resource, true) => RecoveryAction::Restart { target: issue.component.clone() },
                (IssueType::Capacity, true) => RecoveryAction::Scale { target: issue.component.clone(), increment: 1 },
                (IssueType::Performance, true) => {
                    RecoveryAction::Repair { target: issue.component.clone(), advisory: issue.description.clone() }
                }
                _ => RecoveryAction::Alert { target: issue.component.clone(), message: issue.description.clone() },
            };
            PlannedAction { risk: action.risk(), estimated_duration: action.estimated_duration(), action }
        })
        .collect();

    let risk = actions.iter().map(|a| a.risk).max().unwrap_or(ActionRisk::Low);
    let has_critical = health.issues.iter().any(|i| i.severity == IssueSeverity::Critical);
    let priority = if has_critical {
        Priority::Critical
    } else if health.score < 50 {
        Priority::High
    } else if health.score < 80 {
        Priority::Medium
    } else {
        Priority::Low
    };
    let requires_approval = risk >= ActionRisk::High || priority == Priority::Critical;

    RecoveryPlan { actions, risk, priority, requires_approval }
}

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action: RecoveryAction,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanExecutionRecord {
    pub results: Vec<ActionResult>,
    pub cancelled: bool,
}

/// Side-effecting half of a recovery action, implemented in the operator
/// crate (patches CR annotations, scales Deployments). Kept as a trait
/// here so plan-building and plan-scoring stay pure and unit-testable.
#[async_trait]
pub trait RecoveryExecutor: Send + Sync {
    async fn execute(&self, action: &RecoveryAction) -> Result<(), Error>;
}

pub struct AutoRecoveryEngine<E: RecoveryExecutor> {
    executor: E,
}

impl<E: RecoveryExecutor> AutoRecoveryEngine<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// Executes an approved plan sequentially, sleeping
    /// `RECOVERY_BACKOFF_BASE` between actions and checking `cancel`
    /// between each one (spec.md §4.8, §5 "Cancellation"). Refuses to run
    /// a plan still requiring approval.
    pub async fn execute_plan(&self, plan: &RecoveryPlan, cancel: &CancellationToken) -> PlanExecutionRecord {
        let mut record = PlanExecutionRecord::default();
        if plan.requires_approval {
            return record;
        }
        for (i, planned) in plan.actions.iter().enumerate() {
            if cancel.is_cancelled() {
                record.cancelled = true;
                break;
            }
            if i > 0 && !storm_common::backoff::sleep_cancellable(cancel, RECOVERY_BACKOFF_BASE).await {
                record.cancelled = true;
                break;
            }
            let outcome = self.executor.execute(&planned.action).await;
            record.results.push(ActionResult {
                action: planned.action.clone(),
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            });
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_health::CriticalIssue;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn issue(issue_type: IssueType, severity: IssueSeverity, auto_recoverable: bool) -> CriticalIssue {
        CriticalIssue {
            severity,
            issue_type,
            component: "nimbus".into(),
            description: "test issue".into(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            auto_recoverable,
        }
    }

    #[test]
    fn resource_issue_maps_to_restart_with_high_risk_requiring_approval() {
        let health = SystemHealth {
            score: 40,
            overall: crate::system_health::OverallHealth::Unhealthy,
            issues: vec![issue(IssueType::Resource, IssueSeverity::Critical, true)],
        };
        let plan = build_recovery_plan(&health);
        assert!(matches!(plan.actions[0].action, RecoveryAction::Restart { .. }));
        assert_eq!(plan.risk, ActionRisk::High);
        assert!(plan.requires_approval);
    }

    #[test]
    fn non_recoverable_issue_becomes_alert() {
        let health = SystemHealth {
            score: 90,
            overall: crate::system_health::OverallHealth::Healthy,
            issues: vec![issue(IssueType::Availability, IssueSeverity::Low, false)],
        };
        let plan = build_recovery_plan(&health);
        assert!(matches!(plan.actions[0].action, RecoveryAction::Alert { .. }));
        assert_eq!(plan.risk, ActionRisk::Low);
    }

    struct CountingExecutor {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecoveryExecutor for CountingExecutor {
        async fn execute(&self, _action: &RecoveryAction) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn plan_requiring_approval_does_not_execute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = AutoRecoveryEngine::new(CountingExecutor { calls: calls.clone() });
        let health = SystemHealth {
            score: 10,
            overall: crate::system_health::OverallHealth::Unhealthy,
            issues: vec![issue(IssueType::Resource, IssueSeverity::Critical, true)],
        };
        let plan = build_recovery_plan(&health);
        assert!(plan.requires_approval);
        let record = engine.execute_plan(&plan, &CancellationToken::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(record.results.is_empty());
    }

    #[tokio::test]
    async fn low_risk_plan_executes_every_action() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = AutoRecoveryEngine::new(CountingExecutor { calls: calls.clone() });
        let health = SystemHealth {
            score: 95,
            overall: crate::system_health::OverallHealth::Healthy,
            issues: vec![
                issue(IssueType::Performance, IssueSeverity::Low, true),
                issue(IssueType::Availability, IssueSeverity::Low, false),
            ],
        };
        let plan = build_recovery_plan(&health);
        assert!(!plan.requires_approval);
        let record = engine.execute_plan(&plan, &CancellationToken::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(record.results.len(), 2);
        assert!(record.results.iter().all(|r| r.success));
    }
}
