//! Periodic cross-resource health sweep and auto-recovery loop (spec.md
//! §4.7, §4.8). Runs alongside the three per-kind reconcilers, not gated
//! by leader election the same way: every replica evaluates health, but
//! only the leader's recovery actions land, since `RecoveryExecutor`
//! mutates resources through the same annotation/scale surface the
//! reconcilers already serialize through `PatchParams::apply`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use owo_colors::OwoColorize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use storm_common::annotations::RESTART_ANNOTATION;
use storm_common::colors::{FG1, FG2};
use storm_common::Error;
use storm_coordinator::{build_recovery_plan, AutoRecoveryEngine, CrossResourceMonitor, KubeResourceLookup, RecoveryAction, RecoveryExecutor};
use storm_types::StormCluster;

const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

struct OperatorRecoveryExecutor {
    client: Client,
    namespace: String,
}

#[async_trait]
impl RecoveryExecutor for OperatorRecoveryExecutor {
    async fn execute(&self, action: &RecoveryAction) -> Result<(), Error> {
        match action {
            RecoveryAction::Restart { target } => {
                let api: Api<StormCluster> = Api::namespaced(self.client.clone(), &self.namespace);
                let patch = json!({ "metadata": { "annotations": { RESTART_ANNOTATION: "true" } } });
                api.patch(target, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
                Ok(())
            }
            RecoveryAction::Scale { target, increment } => {
                let name = format!("{target}-supervisor");
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
                let Some(current) = api.get_opt(&name).await? else {
                    return Err(Error::Transient(format!("supervisor deployment {name} not found for scale action")));
                };
                let replicas = current.spec.and_then(|s| s.replicas).unwrap_or(1) + increment;
                let patch = json!({ "spec": { "replicas": replicas.max(0) } });
                api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
                Ok(())
            }
            RecoveryAction::Repair { target, advisory } => {
                println!("{}", format!("recovery advisory for {target}: {advisory}").color(FG2));
                Ok(())
            }
            RecoveryAction::Alert { target, message } => {
                eprintln!("{}", format!("recovery alert for {target}: {message}").yellow());
                Ok(())
            }
        }
    }
}

pub async fn run(client: Client, cascade_ratio: f64, cancel: CancellationToken) {
    println!("{}", "Starting cross-resource health monitor...".color(FG1));

    let namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let lookup = Arc::new(KubeResourceLookup::new(client.clone()));
    let monitor = CrossResourceMonitor::new(lookup, cascade_ratio);
    let engine = AutoRecoveryEngine::new(OperatorRecoveryExecutor { client, namespace: namespace.clone() });

    loop {
        if !storm_common::backoff::sleep_cancellable(&cancel, MONITOR_INTERVAL).await {
            break;
        }

        let health = match monitor.evaluate(&namespace).await {
            Ok(h) => h,
            Err(e) => {
                eprintln!("{}", format!("health evaluation failed: {e}").red());
                continue;
            }
        };

        println!(
            "{} {} {}",
            "system health:".color(FG1),
            health.score.color(FG2),
            format!("({:?}, {} issues)", health.overall, health.issues.len()).color(FG2),
        );

        if health.issues.is_empty() {
            continue;
        }

        let plan = build_recovery_plan(&health);
        if plan.requires_approval {
            eprintln!(
                "{}",
                format!("recovery plan for {namespace} requires manual approval (risk={:?}, priority={:?}); not executing", plan.risk, plan.priority).yellow()
            );
            continue;
        }

        let record = engine.execute_plan(&plan, &cancel).await;
        for result in &record.results {
            if result.success {
                println!("{}", format!("recovery action {:?} succeeded", result.action).color(FG2));
            } else {
                eprintln!("{}", format!("recovery action {:?} failed: {:?}", result.action, result.error).red());
            }
        }
    }
}
