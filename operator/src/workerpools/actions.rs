//! Write-phase actions for the WorkerPool reconciler (spec.md §4.9):
//! render the Deployment, read back its replica counts, and drive the
//! WorkerPool state machine from the observation.

use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use storm_common::annotations::{FINALIZER, RESTART_ANNOTATION, SPEC_HASH_ANNOTATION};
use storm_common::{hash_spec, patch::patch_status, Error};
use storm_statemachine::{new_worker_pool_machine, WorkerPoolEvent};
use storm_types::{condition, upsert_condition, StormCluster, StormWorkerPool, StormWorkerPoolStatus, WorkerPoolPhase, COND_READY};

use crate::workloads::worker_pool_deployment;

pub async fn ensure_finalizer(client: Client, pool: &StormWorkerPool) -> Result<(), Error> {
    let namespace = pool.namespace().unwrap_or_default();
    let name = pool.name_any();
    let api: Api<StormWorkerPool> = Api::namespaced(client, &namespace);
    let patch = json!({ "metadata": { "finalizers": [FINALIZER] } });
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(())
}

pub async fn remove_finalizer(client: Client, pool: &StormWorkerPool) -> Result<(), Error> {
    let namespace = pool.namespace().unwrap_or_default();
    let name = pool.name_any();
    let api: Api<StormWorkerPool> = Api::namespaced(client, &namespace);
    let patch = json!({ "metadata": { "finalizers": Vec::<String>::new() } });
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(())
}

/// Server-side-applies the worker Deployment for the current spec and
/// returns the spec hash stamped on its pod template, used both for the
/// apply and for deciding whether a later reconcile needs a rolling
/// restart.
pub async fn apply_deployment(client: Client, pool: &StormWorkerPool, cluster: &StormCluster) -> Result<String, Error> {
    let namespace = pool.namespace().unwrap_or_default();
    let spec_hash = hash_spec(&pool.spec);
    let deployment = worker_pool_deployment(pool, cluster, &spec_hash);
    let name = deployment.metadata.name.clone().unwrap_or_default();
    let api: kube::Api<k8s_openapi::api::apps::v1::Deployment> = Api::namespaced(client, &namespace);
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Apply(&deployment)).await?;
    Ok(spec_hash)
}

pub struct ObservedReplicas {
    pub ready: i32,
    pub available: i32,
}

pub async fn observe_replicas(client: Client, pool: &StormWorkerPool) -> Result<ObservedReplicas, Error> {
    let namespace = pool.namespace().unwrap_or_default();
    let name = format!("{}-workers", pool.name_any());
    let api: kube::Api<k8s_openapi::api::apps::v1::Deployment> = Api::namespaced(client, &namespace);
    let status = api.get_opt(&name).await?.and_then(|d| d.status);
    Ok(ObservedReplicas {
        ready: status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
        available: status.as_ref().and_then(|s| s.available_replicas).unwrap_or(0),
    })
}

/// Pure decision for which state machine event, if any, applies given the
/// current phase and observed readiness (spec.md §4.9 step 4).
pub fn decide_worker_pool_event(
    current: WorkerPoolPhase,
    desired_replicas: i32,
    ready_replicas: i32,
    restart_requested: bool,
) -> Option<WorkerPoolEvent> {
    use WorkerPoolPhase::*;
    match current {
        Unknown => Some(WorkerPoolEvent::Initialize),
        Pending => Some(WorkerPoolEvent::BeginCreate),
        Creating => {
            if ready_replicas >= desired_replicas && desired_replicas > 0 {
                Some(WorkerPoolEvent::CreateComplete)
            } else {
                None
            }
        }
        Ready => {
            if restart_requested {
                Some(WorkerPoolEvent::PoolUpdate)
            } else if ready_replicas != desired_replicas {
                Some(WorkerPoolEvent::Scale)
            } else {
                None
            }
        }
        Scaling => {
            if ready_replicas == desired_replicas {
                Some(WorkerPoolEvent::ScaleComplete)
            } else {
                None
            }
        }
        Updating => {
            if ready_replicas >= desired_replicas && desired_replicas > 0 {
                Some(WorkerPoolEvent::UpdateComplete)
            } else {
                None
            }
        }
        Failed => {
            if restart_requested {
                Some(WorkerPoolEvent::Recover)
            } else {
                None
            }
        }
        Draining | Deleting | Deleted => None,
    }
}

pub async fn apply_event(
    client: kube::Client,
    pool: &StormWorkerPool,
    event: WorkerPoolEvent,
    mutate: impl FnOnce(&mut StormWorkerPoolStatus) + Send,
) -> Result<WorkerPoolPhase, Error> {
    let current = pool.status.clone().unwrap_or_default().phase;
    let mut machine = new_worker_pool_machine().resume(current);
    let next = machine.fire(event).copied().unwrap_or(current);

    let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now());
    let updated = patch_status::<StormWorkerPoolStatus, StormWorkerPool>(client, pool, |s| {
        s.phase = next;
        let ready = s.ready_replicas >= s.desired_replicas && s.desired_replicas > 0;
        upsert_condition(&mut s.conditions, condition(COND_READY, ready, if ready { "Ready" } else { "NotReady" }, "worker pool readiness", now));
        mutate(s);
    })
    .await?;
    Ok(updated.status.unwrap_or_default().phase)
}

pub fn restart_requested(pool: &StormWorkerPool, current_hash: &str) -> bool {
    pool.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(RESTART_ANNOTATION))
        .map(|v| v == "true")
        .unwrap_or(false)
        || pool
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
            .map(|existing| existing != current_hash)
            .unwrap_or(false)
}

pub async fn stamp_spec_hash(client: Client, pool: &StormWorkerPool, spec_hash: &str) -> Result<(), Error> {
    let namespace = pool.namespace().unwrap_or_default();
    let name = pool.name_any();
    let api: Api<StormWorkerPool> = Api::namespaced(client, &namespace);
    let patch = json!({
        "metadata": {
            "annotations": {
                SPEC_HASH_ANNOTATION: spec_hash,
                RESTART_ANNOTATION: serde_json::Value::Null,
            }
        }
    });
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_initializes() {
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Unknown, 3, 0, false), Some(WorkerPoolEvent::Initialize));
    }

    #[test]
    fn creating_waits_for_all_replicas_ready() {
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Creating, 3, 2, false), None);
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Creating, 3, 3, false), Some(WorkerPoolEvent::CreateComplete));
    }

    #[test]
    fn ready_rescales_on_replica_drift() {
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Ready, 3, 2, false), Some(WorkerPoolEvent::Scale));
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Ready, 3, 3, false), None);
    }

    #[test]
    fn ready_prefers_update_over_scale_when_restart_requested() {
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Ready, 3, 2, true), Some(WorkerPoolEvent::PoolUpdate));
    }

    #[test]
    fn failed_only_recovers_on_restart_request() {
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Failed, 3, 0, false), None);
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Failed, 3, 0, true), Some(WorkerPoolEvent::Recover));
    }

    #[test]
    fn terminal_and_draining_states_have_no_automatic_event() {
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Draining, 3, 3, false), None);
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Deleting, 0, 0, false), None);
        assert_eq!(decide_worker_pool_event(WorkerPoolPhase::Deleted, 0, 0, false), None);
    }
}
