//! Write-phase actions and pure phase-transition decisions for the
//! Cluster reconciler (spec.md §4.4).

use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use storm_common::annotations::{FINALIZER, RESTART_ANNOTATION};
use storm_common::{hash_spec, patch::patch_status, Error};
use storm_statemachine::{new_cluster_machine, ClusterEvent};
use storm_types::{condition, upsert_condition, ClusterPhase, StormCluster, StormTopology, COND_READY};

use crate::workloads;

/// Adds the shared finalizer via a JSON merge patch on metadata alone
/// (status is untouched, so this does not race the status-patch field
/// manager).
pub async fn ensure_finalizer(client: Client, cluster: &StormCluster) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let api: Api<StormCluster> = Api::namespaced(client, &namespace);
    let patch = json!({ "metadata": { "finalizers": [FINALIZER] } });
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(())
}

pub async fn clear_restart_annotation(client: Client, cluster: &StormCluster) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let api: Api<StormCluster> = Api::namespaced(client, &namespace);
    let patch = json!({ "metadata": { "annotations": { RESTART_ANNOTATION: serde_json::Value::Null } } });
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(())
}

/// Server-side-applies the Nimbus/supervisor/UI workloads and their
/// shared `storm.yaml` ConfigMap (spec.md §4.4 step 3).
pub async fn apply_workloads(client: Client, cluster: &StormCluster, spec_hash: &str) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let pp = PatchParams::apply("storm-operator").force();

    let configmaps: Api<k8s_openapi::api::core::v1::ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let cm = workloads::storm_yaml_configmap(cluster, spec_hash);
    configmaps.patch(cm.metadata.name.as_deref().unwrap(), &pp, &Patch::Apply(&cm)).await?;

    let services: Api<k8s_openapi::api::core::v1::Service> = Api::namespaced(client.clone(), &namespace);
    let nimbus_svc = workloads::nimbus_headless_service(cluster);
    services.patch(nimbus_svc.metadata.name.as_deref().unwrap(), &pp, &Patch::Apply(&nimbus_svc)).await?;

    let statefulsets: Api<k8s_openapi::api::apps::v1::StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let nimbus_sts = workloads::nimbus_statefulset(cluster, spec_hash);
    statefulsets.patch(nimbus_sts.metadata.name.as_deref().unwrap(), &pp, &Patch::Apply(&nimbus_sts)).await?;

    let deployments: Api<k8s_openapi::api::apps::v1::Deployment> = Api::namespaced(client.clone(), &namespace);
    let supervisor = workloads::supervisor_deployment(cluster, spec_hash);
    deployments.patch(supervisor.metadata.name.as_deref().unwrap(), &pp, &Patch::Apply(&supervisor)).await?;

    if cluster.spec.ui.enabled {
        let ui = workloads::ui_deployment(cluster, spec_hash);
        deployments.patch(ui.metadata.name.as_deref().unwrap(), &pp, &Patch::Apply(&ui)).await?;
        let ui_svc = workloads::ui_service(cluster);
        services.patch(ui_svc.metadata.name.as_deref().unwrap(), &pp, &Patch::Apply(&ui_svc)).await?;
    }

    Ok(())
}

pub struct ObservedReadiness {
    pub nimbus_ready: i32,
    pub supervisor_ready: i32,
    pub ui_ready: bool,
}

/// Reads back the workloads' `status.readyReplicas` (spec.md §4.4 step 5).
pub async fn observe_readiness(client: Client, cluster: &StormCluster) -> Result<ObservedReadiness, Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let statefulsets: Api<k8s_openapi::api::apps::v1::StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let nimbus_ready = statefulsets
        .get_opt(&format!("{name}-nimbus"))
        .await?
        .and_then(|s| s.status)
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    let deployments: Api<k8s_openapi::api::apps::v1::Deployment> = Api::namespaced(client.clone(), &namespace);
    let supervisor_ready = deployments
        .get_opt(&format!("{name}-supervisor"))
        .await?
        .and_then(|d| d.status)
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    let ui_ready = if cluster.spec.ui.enabled {
        deployments
            .get_opt(&format!("{name}-ui"))
            .await?
            .and_then(|d| d.status)
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
            > 0
    } else {
        true
    };

    Ok(ObservedReadiness { nimbus_ready, supervisor_ready, ui_ready })
}

/// Pure phase-transition decision (spec.md §4.4 step 5, §4.3): given the
/// persisted phase and freshly-observed readiness, returns the single
/// event (if any) to fire on the Cluster state machine this reconcile.
pub fn decide_cluster_event(
    current: ClusterPhase,
    nimbus_ready: i32,
    nimbus_desired: i32,
    supervisor_ready: i32,
    supervisor_desired: i32,
    ui_ready: bool,
    ui_enabled: bool,
    zero_ready_streak: u32,
    restart_requested: bool,
) -> Option<ClusterEvent> {
    let all_ready = nimbus_ready >= nimbus_desired.max(1)
        && supervisor_ready >= supervisor_desired.max(1)
        && (!ui_enabled || ui_ready);
    let any_unhealthy = nimbus_ready == 0 || supervisor_ready == 0 || (ui_enabled && !ui_ready);

    match current {
        ClusterPhase::Unknown => Some(ClusterEvent::Initialize),
        ClusterPhase::Pending => Some(ClusterEvent::BeginCreate),
        ClusterPhase::Creating => all_ready.then_some(ClusterEvent::CreateComplete),
        ClusterPhase::Running => {
            if restart_requested {
                Some(ClusterEvent::ClusterUpdate)
            } else if any_unhealthy && zero_ready_streak >= 2 {
                Some(ClusterEvent::Error)
            } else {
                None
            }
        }
        ClusterPhase::Updating => {
            if all_ready {
                Some(ClusterEvent::UpdateComplete)
            } else if any_unhealthy && zero_ready_streak >= 2 {
                Some(ClusterEvent::Error)
            } else {
                None
            }
        }
        ClusterPhase::Failed => restart_requested.then_some(ClusterEvent::Recover),
        ClusterPhase::Terminating => None,
    }
}

/// Applies the desired workloads, observes readiness, drives the phase
/// machine by at most one event, and patches status — the heart of
/// spec.md §4.4 steps 3-6.
pub async fn converge(client: Client, cluster: &StormCluster) -> Result<ClusterPhase, Error> {
    let spec_hash = hash_spec(&cluster.spec);
    apply_workloads(client.clone(), cluster, &spec_hash).await?;
    let observed = observe_readiness(client.clone(), cluster).await?;

    let status = cluster.status.clone().unwrap_or_default();
    let restart_requested = cluster.annotations().contains_key(RESTART_ANNOTATION);
    let zero_ready_streak = if observed.nimbus_ready == 0 || observed.supervisor_ready == 0 {
        status.zero_ready_streak + 1
    } else {
        0
    };

    let event = decide_cluster_event(
        status.phase,
        observed.nimbus_ready,
        cluster.spec.nimbus.replicas,
        observed.supervisor_ready,
        cluster.spec.supervisor.replicas,
        observed.ui_ready,
        cluster.spec.ui.enabled,
        zero_ready_streak,
        restart_requested,
    );

    let mut machine = new_cluster_machine().resume(status.phase);
    let next_phase = match event {
        Some(ev) => machine.fire(ev).copied().unwrap_or(status.phase),
        None => status.phase,
    };

    let ready = next_phase == ClusterPhase::Running;
    let updated = patch_status::<storm_types::StormClusterStatus, StormCluster>(client.clone(), cluster, |s| {
        s.phase = next_phase;
        s.nimbus_ready = observed.nimbus_ready;
        s.supervisor_ready = observed.supervisor_ready;
        s.ui_ready = observed.ui_ready;
        s.zero_ready_streak = zero_ready_streak;
        s.nimbus_endpoint = Some(format!("{}-nimbus.{}.svc.cluster.local:6627", cluster.name_any(), cluster.namespace().unwrap_or_default()));
        if cluster.spec.ui.enabled {
            s.ui_endpoint = Some(format!("{}-ui.{}.svc.cluster.local:8080", cluster.name_any(), cluster.namespace().unwrap_or_default()));
        }
        s.message = Some(format!("{next_phase}"));
        upsert_condition(
            &mut s.conditions,
            condition(COND_READY, ready, if ready { "AllComponentsReady" } else { "Reconciling" }, &format!("{next_phase}"), k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now())),
        );
    })
    .await?;

    if event == Some(ClusterEvent::ClusterUpdate) || (restart_requested && next_phase != ClusterPhase::Failed) {
        clear_restart_annotation(client, cluster).await?;
    }

    Ok(updated.status.unwrap_or_default().phase)
}

/// Checks that no live `StormTopology` still references this cluster
/// before letting deletion proceed (spec.md §4.4: terminal cleanup order).
pub async fn terminating(client: Client, cluster: &StormCluster) -> Result<bool, Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let topologies: Api<StormTopology> = Api::namespaced(client.clone(), &namespace);
    let still_referenced = topologies
        .list(&Default::default())
        .await?
        .items
        .iter()
        .any(|t| t.spec.cluster_ref == name);

    if still_referenced {
        return Ok(false);
    }

    let clusters: Api<StormCluster> = Api::namespaced(client, &namespace);
    let patch = json!({ "metadata": { "finalizers": Vec::<String>::new() } });
    clusters.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_always_initializes() {
        assert_eq!(
            decide_cluster_event(ClusterPhase::Unknown, 0, 1, 0, 1, false, true, 0, false),
            Some(ClusterEvent::Initialize)
        );
    }

    #[test]
    fn creating_waits_until_all_components_ready() {
        assert_eq!(decide_cluster_event(ClusterPhase::Creating, 0, 1, 1, 1, true, true, 0, false), None);
        assert_eq!(
            decide_cluster_event(ClusterPhase::Creating, 1, 1, 1, 1, true, true, 0, false),
            Some(ClusterEvent::CreateComplete)
        );
    }

    #[test]
    fn running_debounces_failure_by_two_zero_streaks() {
        assert_eq!(decide_cluster_event(ClusterPhase::Running, 0, 1, 1, 1, true, true, 1, false), None);
        assert_eq!(
            decide_cluster_event(ClusterPhase::Running, 0, 1, 1, 1, true, true, 2, false),
            Some(ClusterEvent::Error)
        );
    }

    #[test]
    fn restart_annotation_drives_running_to_updating() {
        assert_eq!(
            decide_cluster_event(ClusterPhase::Running, 1, 1, 1, 1, true, true, 0, true),
            Some(ClusterEvent::ClusterUpdate)
        );
    }

    #[test]
    fn failed_only_recovers_on_restart_request() {
        assert_eq!(decide_cluster_event(ClusterPhase::Failed, 1, 1, 1, 1, true, true, 0, false), None);
        assert_eq!(
            decide_cluster_event(ClusterPhase::Failed, 1, 1, 1, 1, true, true, 0, true),
            Some(ClusterEvent::Recover)
        );
    }

    #[test]
    fn terminating_is_a_sink() {
        assert_eq!(decide_cluster_event(ClusterPhase::Terminating, 0, 1, 0, 1, false, true, 5, true), None);
    }
}
