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

use storm_client::{ArtifactFetcher, SubmitOutcome};
use storm_common::colors::{FG1, FG2};
use storm_common::metrics::ReconcileMetrics;
use storm_common::{Error, PROBE_INTERVAL};
use storm_coordinator::{DependencyKind, DependencyManager, DependencyRef, DependencyStatus, KubeResourceLookup, ResourceType};
use storm_statemachine::TopologyEvent;
use storm_types::{ClusterPhase, StormCluster, StormTopology, TopologyPhase};

use crate::clients::NimbusClients;

use super::actions::{self, DownloadResult};
use super::provisioning::{self, ProvisionOutcome};

pub async fn run(client: Client, fetcher: Arc<ArtifactFetcher>, nimbus_clients: Arc<NimbusClients>, cancel: CancellationToken) {
    println!("{}", "Starting StormTopology controller...".color(FG1));

    let context = Arc::new(ContextData::new(client.clone(), fetcher, nimbus_clients));
    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("storm-topology-controller-{}", uuid::Uuid::new_v4()));
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams { holder_id, lease_name: "storm-topology-controller-lock".to_string(), lease_ttl },
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
                eprintln!("{}", format!("topology leader election renew/acquire failed: {e}").red());
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "Acquired StormTopology leadership; starting controller".color(FG1));
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let namespace = lease_namespace.clone();
                let crd_api: Api<StormTopology> = Api::namespaced(client_for_controller.clone(), &namespace);
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(crd_api, Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost StormTopology leadership; stopping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    fetcher: Arc<ArtifactFetcher>,
    nimbus_clients: Arc<NimbusClients>,
    metrics: ReconcileMetrics,
    last_action: Mutex<HashMap<(String, String), (TopologyAction, Instant)>>,
}

impl ContextData {
    fn new(client: Client, fetcher: Arc<ArtifactFetcher>, nimbus_clients: Arc<NimbusClients>) -> Self {
        Self { client, fetcher, nimbus_clients, metrics: ReconcileMetrics::new("StormTopology"), last_action: Mutex::new(HashMap::new()) }
    }
}

#[derive(Debug, PartialEq, Clone)]
enum TopologyAction {
    EnsureFinalizer,
    Terminating,
    DependenciesNotMet(Duration),
    Validate,
    Download,
    Submit,
    MonitorRunning,
    Update,
    Kill,
    Requeue(Duration),
}

impl TopologyAction {
    fn to_str(&self) -> &'static str {
        match self {
            TopologyAction::EnsureFinalizer => "EnsureFinalizer",
            TopologyAction::Terminating => "Terminating",
            TopologyAction::DependenciesNotMet(_) => "DependenciesNotMet",
            TopologyAction::Validate => "Validate",
            TopologyAction::Download => "Download",
            TopologyAction::Submit => "Submit",
            TopologyAction::MonitorRunning => "MonitorRunning",
            TopologyAction::Update => "Update",
            TopologyAction::Kill => "Kill",
            TopologyAction::Requeue(_) => "Requeue",
        }
    }
}

async fn reconcile(instance: Arc<StormTopology>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("StormTopology must be namespaced".to_string()))?;
    let name = instance.name_any();

    context.metrics.record_reconcile(&namespace, &name);
    let start = Instant::now();

    let action = determine_action(client.clone(), &namespace, &instance).await?;

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

    let result = run_action(client, &namespace, &instance, action, &context).await?;
    context.metrics.record_reconcile_duration(&namespace, &name, start.elapsed().as_secs_f64());
    Ok(result)
}

async fn determine_action(client: Client, namespace: &str, instance: &StormTopology) -> Result<TopologyAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(TopologyAction::Terminating);
    }
    if !instance.metadata.finalizers.as_ref().map(|f| f.iter().any(|x| x == storm_common::annotations::FINALIZER)).unwrap_or(false) {
        return Ok(TopologyAction::EnsureFinalizer);
    }

    let phase = instance.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if matches!(phase, TopologyPhase::Unknown | TopologyPhase::Pending) {
        let lookup = Arc::new(KubeResourceLookup::new(client));
        let mgr = DependencyManager::new(lookup);
        let dep = DependencyRef {
            resource_type: ResourceType::Cluster,
            namespace: namespace.to_string(),
            name: instance.spec.cluster_ref.clone(),
            required_phase: ClusterPhase::Running.to_string(),
            kind: DependencyKind::Required,
        };
        let outcome = mgr.check(&dep).await?;
        if outcome.status != DependencyStatus::Satisfied {
            return Ok(TopologyAction::DependenciesNotMet(outcome.recommended_wait));
        }
        return Ok(TopologyAction::Validate);
    }

    Ok(match phase {
        TopologyPhase::Validating => TopologyAction::Validate,
        TopologyPhase::Downloading => TopologyAction::Download,
        TopologyPhase::Submitting => TopologyAction::Submit,
        TopologyPhase::Running => TopologyAction::MonitorRunning,
        TopologyPhase::Updating => TopologyAction::Update,
        TopologyPhase::Killing => TopologyAction::Kill,
        TopologyPhase::Suspended => TopologyAction::Requeue(PROBE_INTERVAL),
        TopologyPhase::Failed => TopologyAction::Requeue(storm_common::backoff::capped_requeue_delay(1)),
        TopologyPhase::Killed => TopologyAction::Requeue(PROBE_INTERVAL),
        TopologyPhase::Unknown | TopologyPhase::Pending => unreachable!(),
    })
}

async fn run_action(
    client: Client,
    namespace: &str,
    instance: &StormTopology,
    action: TopologyAction,
    context: &ContextData,
) -> Result<Action, Error> {
    let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now());
    match action {
        TopologyAction::Requeue(d) => Ok(Action::requeue(d)),
        TopologyAction::EnsureFinalizer => {
            actions::ensure_finalizer(client, instance).await?;
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        TopologyAction::DependenciesNotMet(wait) => {
            actions::apply_event(client, instance, TopologyEvent::Validate, |s| {
                s.phase = TopologyPhase::Pending;
                actions::upsert(&mut s.conditions, storm_types::condition("DependenciesMet", false, "Waiting", "waiting on referenced StormCluster", now));
            })
            .await
            .ok();
            Ok(Action::requeue(wait))
        }
        TopologyAction::Validate => {
            match actions::validate_structure(instance) {
                Ok(()) => {
                    actions::apply_event(client, instance, TopologyEvent::Validate, |_| {}).await.ok();
                    actions::apply_event(client, instance, TopologyEvent::ValidationSuccess, |s| {
                        actions::upsert(&mut s.conditions, actions::validation_condition(now, true, "structurally valid"));
                    })
                    .await?;
                    Ok(Action::requeue(Duration::from_millis(100)))
                }
                Err(reason) => {
                    actions::apply_event(client, instance, TopologyEvent::Validate, |_| {}).await.ok();
                    actions::apply_event(client, instance, TopologyEvent::ValidationFailed, |s| {
                        s.failure_reason = Some(reason.clone());
                        actions::upsert(&mut s.conditions, actions::validation_condition(now, false, &reason));
                    })
                    .await?;
                    Ok(Action::await_change())
                }
            }
        }
        TopologyAction::Download => {
            let name = instance.name_any();
            let version = instance.spec.version().unwrap_or("unversioned").to_string();
            match actions::download(client.clone(), &context.fetcher, namespace, &name, &version, instance).await {
                DownloadResult::Ready(path) => {
                    actions::apply_event(client, instance, TopologyEvent::DownloadComplete, |s| {
                        s.jar_path = Some(path);
                    })
                    .await?;
                    Ok(Action::requeue(Duration::from_millis(100)))
                }
                DownloadResult::PendingExtraction | DownloadResult::Transient(_) => Ok(Action::requeue(Duration::from_secs(15))),
                DownloadResult::Fatal(reason) => {
                    actions::apply_event(client, instance, TopologyEvent::DownloadFailed, |s| {
                        s.failure_reason = Some(reason);
                    })
                    .await?;
                    Ok(Action::await_change())
                }
            }
        }
        TopologyAction::Submit => {
            let Some(jar_path) = instance.status.as_ref().and_then(|s| s.jar_path.clone()) else {
                return Ok(Action::requeue(Duration::from_secs(5)));
            };
            let clusters: Api<StormCluster> = Api::namespaced(client.clone(), namespace);
            let Some(cluster) = clusters.get_opt(&instance.spec.cluster_ref).await? else {
                return Ok(Action::requeue(Duration::from_secs(15)));
            };

            let lookup = KubeResourceLookup::new(client.clone());
            if let ProvisionOutcome::Wait(wait) = provisioning::provision(client.clone(), &lookup, namespace, instance, &cluster).await? {
                return Ok(Action::requeue(wait));
            }

            let handle = context.nimbus_clients.get_or_create(&cluster).await;
            match actions::submit(&handle, instance, &jar_path).await {
                Ok(SubmitOutcome::Submitted { topology_id }) => {
                    actions::apply_event(client, instance, TopologyEvent::SubmitSuccess, |s| {
                        s.storm_topology_id = Some(topology_id);
                        s.last_submitted_version = instance.spec.version().map(str::to_string);
                        actions::upsert(&mut s.conditions, actions::submission_condition(now, true, "submitted"));
                    })
                    .await?;
                    Ok(Action::requeue(Duration::from_secs(5)))
                }
                Ok(SubmitOutcome::AlreadyAlive) => {
                    actions::apply_event(client, instance, TopologyEvent::SubmitSuccess, |s| {
                        s.last_submitted_version = instance.spec.version().map(str::to_string);
                        actions::upsert(&mut s.conditions, actions::submission_condition(now, true, "already alive"));
                    })
                    .await?;
                    Ok(Action::requeue(Duration::from_secs(5)))
                }
                Err(reason) => {
                    actions::apply_event(client, instance, TopologyEvent::SubmitFailed, |s| {
                        s.failure_reason = Some(reason.clone());
                        actions::upsert(&mut s.conditions, actions::submission_condition(now, false, &reason));
                    })
                    .await?;
                    Ok(Action::await_change())
                }
            }
        }
        TopologyAction::MonitorRunning => {
            let Some(handle) = resolve_nimbus_handle(client.clone(), namespace, instance, context).await? else {
                return Ok(Action::requeue(Duration::from_secs(15)));
            };
            let Some(topology_id) = instance.status.as_ref().and_then(|s| s.storm_topology_id.clone()) else {
                return Ok(Action::requeue(PROBE_INTERVAL));
            };
            match handle.get_topology_info(&topology_id).await {
                Err(_) => {
                    actions::apply_event(client, instance, TopologyEvent::Error, |s| {
                        s.failure_reason = Some("topology no longer present in Storm".to_string());
                    })
                    .await?;
                    Ok(Action::await_change())
                }
                Ok(summary) => {
                    let desired_version = instance.spec.version().map(str::to_string);
                    if desired_version != instance.status.as_ref().and_then(|s| s.last_submitted_version.clone()) {
                        actions::apply_event(client, instance, TopologyEvent::TopologyUpdate, |_| {}).await?;
                        return Ok(Action::requeue(Duration::from_millis(100)));
                    }
                    let _ = actions::apply_event(client, instance, TopologyEvent::Validate, |s| {
                        s.phase = TopologyPhase::Running;
                        s.uptime_seconds = Some(summary.uptime_secs);
                        s.num_workers = Some(summary.num_workers);
                        s.num_executors = Some(summary.num_executors);
                        s.num_tasks = Some(summary.num_tasks);
                    })
                    .await
                    .ok();
                    Ok(Action::requeue(PROBE_INTERVAL))
                }
            }
        }
        TopologyAction::Update => {
            let Some(handle) = resolve_nimbus_handle(client.clone(), namespace, instance, context).await? else {
                return Ok(Action::requeue(Duration::from_secs(15)));
            };
            if let Err(reason) = actions::kill(&handle, instance).await {
                actions::apply_event(client, instance, TopologyEvent::Error, |s| {
                    s.failure_reason = Some(reason);
                })
                .await?;
                return Ok(Action::await_change());
            }
            wait_for_kill_gone(&handle, instance).await;
            actions::apply_event(client, instance, TopologyEvent::UpdateComplete, |s| {
                s.storm_topology_id = None;
                s.jar_path = None;
            })
            .await?;
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        TopologyAction::Kill => {
            if let Some(handle) = resolve_nimbus_handle(client.clone(), namespace, instance, context).await? {
                let _ = actions::kill(&handle, instance).await;
                wait_for_kill_gone(&handle, instance).await;
            }
            actions::apply_event(client.clone(), instance, TopologyEvent::KillComplete, |_| {}).await?;
            actions::remove_finalizer(client, instance).await?;
            Ok(Action::await_change())
        }
        TopologyAction::Terminating => {
            actions::apply_event(client.clone(), instance, TopologyEvent::Kill, |_| {}).await.ok();
            if let Some(handle) = resolve_nimbus_handle(client.clone(), namespace, instance, context).await? {
                let _ = actions::kill(&handle, instance).await;
                wait_for_kill_gone(&handle, instance).await;
            }
            actions::apply_event(client.clone(), instance, TopologyEvent::KillComplete, |_| {}).await.ok();
            actions::remove_finalizer(client, instance).await?;
            Ok(Action::await_change())
        }
    }
}

async fn wait_for_kill_gone(handle: &storm_client::NimbusClientHandle, instance: &StormTopology) {
    let Some(topology_id) = instance.status.as_ref().and_then(|s| s.storm_topology_id.clone()) else { return };
    let deadline = Duration::from_secs(instance.spec.lifecycle.kill_wait_seconds as u64 + 60);
    let start = Instant::now();
    while start.elapsed() < deadline {
        if handle.get_topology_info(&topology_id).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    eprintln!("{}", format!("topology {} did not disappear from Storm within the kill deadline; proceeding", instance.name_any()).yellow());
}

async fn resolve_nimbus_handle(
    client: Client,
    namespace: &str,
    instance: &StormTopology,
    context: &ContextData,
) -> Result<Option<Arc<storm_client::NimbusClientHandle>>, Error> {
    let clusters: Api<StormCluster> = Api::namespaced(client, namespace);
    match clusters.get_opt(&instance.spec.cluster_ref).await? {
        Some(cluster) => Ok(Some(context.nimbus_clients.get_or_create(&cluster).await)),
        None => Ok(None),
    }
}

fn on_error(instance: Arc<StormTopology>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!("{}", format!("StormTopology reconciliation error for {}: {error}", instance.name_any()).red());
    Action::requeue(Duration::from_secs(5))
}
