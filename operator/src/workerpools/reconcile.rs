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
use storm_types::{StormCluster, StormWorkerPool, WorkerPoolPhase};

use super::actions;

pub async fn run(client: Client, cancel: CancellationToken) {
    println!("{}", "Starting StormWorkerPool controller...".color(FG1));

    let context = Arc::new(ContextData::new(client.clone()));
    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("storm-workerpool-controller-{}", uuid::Uuid::new_v4()));
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams { holder_id, lease_name: "storm-workerpool-controller-lock".to_string(), lease_ttl },
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
                eprintln!("{}", format!("worker pool leader election renew/acquire failed: {e}").red());
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "Acquired StormWorkerPool leadership; starting controller".color(FG1));
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let namespace = lease_namespace.clone();
                let crd_api: Api<StormWorkerPool> = Api::namespaced(client_for_controller.clone(), &namespace);
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(crd_api, Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost StormWorkerPool leadership; stopping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    metrics: ReconcileMetrics,
    last_action: Mutex<HashMap<(String, String), (WorkerPoolAction, Instant)>>,
}

impl ContextData {
    fn new(client: Client) -> Self {
        Self { client, metrics: ReconcileMetrics::new("StormWorkerPool"), last_action: Mutex::new(HashMap::new()) }
    }
}

#[derive(Debug, PartialEq, Clone)]
enum WorkerPoolAction {
    EnsureFinalizer,
    Drain,
    Converge,
    Requeue(Duration),
}

impl WorkerPoolAction {
    fn to_str(&self) -> &'static str {
        match self {
            WorkerPoolAction::EnsureFinalizer => "EnsureFinalizer",
            WorkerPoolAction::Drain => "Drain",
            WorkerPoolAction::Converge => "Converge",
            WorkerPoolAction::Requeue(_) => "Requeue",
        }
    }
}

async fn reconcile(instance: Arc<StormWorkerPool>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("StormWorkerPool must be namespaced".to_string()))?;
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

    let result = run_action(client, &namespace, &instance, action).await?;
    context.metrics.record_reconcile_duration(&namespace, &name, start.elapsed().as_secs_f64());
    Ok(result)
}

fn determine_action(instance: &StormWorkerPool) -> WorkerPoolAction {
    if instance.metadata.deletion_timestamp.is_some() {
        return WorkerPoolAction::Drain;
    }
    if !instance.metadata.finalizers.as_ref().map(|f| f.iter().any(|x| x == storm_common::annotations::FINALIZER)).unwrap_or(false) {
        return WorkerPoolAction::EnsureFinalizer;
    }
    WorkerPoolAction::Converge
}

async fn run_action(client: Client, namespace: &str, instance: &StormWorkerPool, action: WorkerPoolAction) -> Result<Action, Error> {
    match action {
        WorkerPoolAction::Requeue(d) => Ok(Action::requeue(d)),
        WorkerPoolAction::EnsureFinalizer => {
            actions::ensure_finalizer(client, instance).await?;
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        WorkerPoolAction::Drain => {
            let current = instance.status.as_ref().map(|s| s.phase).unwrap_or_default();
            if current != WorkerPoolPhase::Draining && current != WorkerPoolPhase::Deleting {
                actions::apply_event(client.clone(), instance, storm_statemachine::WorkerPoolEvent::Drain, |_| {}).await.ok();
                return Ok(Action::requeue(Duration::from_secs(1)));
            }

            let observed = actions::observe_replicas(client.clone(), instance).await?;
            if observed.ready == 0 {
                let api: Api<k8s_openapi::api::apps::v1::Deployment> = Api::namespaced(client.clone(), namespace);
                let _ = api.delete(&format!("{}-workers", instance.name_any()), &Default::default()).await;
                actions::apply_event(client.clone(), instance, storm_statemachine::WorkerPoolEvent::Delete, |_| {}).await.ok();
                actions::apply_event(client.clone(), instance, storm_statemachine::WorkerPoolEvent::DeleteComplete, |_| {}).await.ok();
                actions::remove_finalizer(client, instance).await?;
                Ok(Action::await_change())
            } else {
                Ok(Action::requeue(Duration::from_secs(5)))
            }
        }
        WorkerPoolAction::Converge => {
            let clusters: Api<StormCluster> = Api::namespaced(client.clone(), namespace);
            let Some(cluster) = clusters.get_opt(&instance.spec.cluster_ref).await? else {
                return Ok(Action::requeue(Duration::from_secs(15)));
            };

            let spec_hash = actions::apply_deployment(client.clone(), instance, &cluster).await?;
            let observed = actions::observe_replicas(client.clone(), instance).await?;
            let current = instance.status.as_ref().map(|s| s.phase).unwrap_or_default();
            let restart = actions::restart_requested(instance, &spec_hash);

            if let Some(event) = actions::decide_worker_pool_event(current, instance.spec.replicas, observed.ready, restart) {
                actions::apply_event(client.clone(), instance, event, |s| {
                    s.desired_replicas = instance.spec.replicas;
                    s.ready_replicas = observed.ready;
                    s.available_replicas = observed.available;
                })
                .await?;
            } else {
                actions::apply_event(client.clone(), instance, storm_statemachine::WorkerPoolEvent::Initialize, |s| {
                    s.desired_replicas = instance.spec.replicas;
                    s.ready_replicas = observed.ready;
                    s.available_replicas = observed.available;
                })
                .await
                .ok();
            }

            if restart {
                actions::stamp_spec_hash(client, instance, &spec_hash).await?;
            }

            let phase = instance.status.as_ref().map(|s| s.phase).unwrap_or_default();
            if matches!(phase, WorkerPoolPhase::Creating | WorkerPoolPhase::Scaling | WorkerPoolPhase::Updating) {
                Ok(Action::requeue(Duration::from_secs(5)))
            } else {
                Ok(Action::requeue(PROBE_INTERVAL))
            }
        }
    }
}

fn on_error(instance: Arc<StormWorkerPool>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!("{}", format!("StormWorkerPool reconciliation error for {}: {error}", instance.name_any()).red());
    Action::requeue(Duration::from_secs(5))
}
