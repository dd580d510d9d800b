use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::StreamExt;
use kube::runtime::{controller::Action, Controller};
use kube::{Api, Client, ResourceExt};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use storm_common::colors::{FG1, FG2};
use storm_common::metrics::ReconcileMetrics;
use storm_common::{Error, PROBE_INTERVAL};
use storm_types::StormCluster;

use super::actions;

/// Entrypoint for the `StormCluster` controller: leader-elected so only
/// one operator replica drives reconciliation at a time (spec.md §5).
pub async fn run(client: Client, cancel: CancellationToken) {
    println!("{}", "Starting StormCluster controller...".color(FG1));

    let context = Arc::new(ContextData::new(client.clone()));
    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("storm-cluster-controller-{}", uuid::Uuid::new_v4()));
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams { holder_id, lease_name: "storm-cluster-controller-lock".to_string(), lease_ttl },
    );

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break;
            },
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("{}", format!("cluster leader election renew/acquire failed: {e}").red());
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "Acquired StormCluster leadership; starting controller".color(FG1));
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let namespace = lease_namespace.clone();
                let crd_api: Api<StormCluster> = Api::namespaced(client_for_controller.clone(), &namespace);
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(crd_api, Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost StormCluster leadership; stopping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    metrics: ReconcileMetrics,
    last_action: Mutex<HashMap<(String, String), (ClusterAction, Instant)>>,
}

impl ContextData {
    fn new(client: Client) -> Self {
        Self { client, metrics: ReconcileMetrics::new("StormCluster"), last_action: Mutex::new(HashMap::new()) }
    }
}

#[derive(Debug, PartialEq, Clone)]
enum ClusterAction {
    EnsureFinalizer,
    Terminating,
    Converge,
    Requeue(Duration),
}

impl ClusterAction {
    fn to_str(&self) -> &'static str {
        match self {
            ClusterAction::EnsureFinalizer => "EnsureFinalizer",
            ClusterAction::Terminating => "Terminating",
            ClusterAction::Converge => "Converge",
            ClusterAction::Requeue(_) => "Requeue",
        }
    }
}

async fn reconcile(instance: Arc<StormCluster>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("StormCluster must be namespaced".to_string()))?;
    let name = instance.name_any();

    context.metrics.record_reconcile(&namespace, &name);
    let start = Instant::now();

    let action = determine_action(&instance);

    {
        let mut last = context.last_action.lock().await;
        let prev = last.insert((namespace.clone(), name.clone()), (action.clone(), Instant::now()));
        if prev.as_ref().map(|(a, _)| a) != Some(&action)
            || prev.map(|(_, at)| at.elapsed() > Duration::from_secs(300)).unwrap_or(true)
        {
            println!(
                "{}{}{}{} {}",
                namespace.color(FG2),
                "/".color(FG1),
                name.color(FG2),
                " action:".color(FG1),
                action.to_str().color(FG2),
            );
        }
    }
    context.metrics.record_action(&namespace, &name, action.to_str());

    let result = match action {
        ClusterAction::Requeue(duration) => Action::requeue(duration),
        ClusterAction::EnsureFinalizer => {
            actions::ensure_finalizer(client, &instance).await?;
            Action::requeue(Duration::from_millis(100))
        }
        ClusterAction::Terminating => {
            let done = actions::terminating(client, &instance).await?;
            if done {
                Action::await_change()
            } else {
                Action::requeue(Duration::from_secs(5))
            }
        }
        ClusterAction::Converge => {
            let phase = actions::converge(client, &instance).await?;
            if phase == storm_types::ClusterPhase::Creating || phase == storm_types::ClusterPhase::Updating {
                Action::requeue(Duration::from_secs(5))
            } else {
                Action::requeue(PROBE_INTERVAL)
            }
        }
    };

    context.metrics.record_reconcile_duration(&namespace, &name, start.elapsed().as_secs_f64());
    Ok(result)
}

fn determine_action(instance: &StormCluster) -> ClusterAction {
    if instance.metadata.deletion_timestamp.is_some() {
        return ClusterAction::Terminating;
    }
    if !instance.metadata.finalizers.as_ref().map(|f| f.iter().any(|x| x == storm_common::annotations::FINALIZER)).unwrap_or(false) {
        return ClusterAction::EnsureFinalizer;
    }
    ClusterAction::Converge
}

fn on_error(instance: Arc<StormCluster>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!("{}", format!("StormCluster reconciliation error for {}: {error}", instance.name_any()).red());
    Action::requeue(Duration::from_secs(5))
}
