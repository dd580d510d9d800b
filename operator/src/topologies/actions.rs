//! Write-phase actions for the Topology reconciler's submit / running /
//! update / kill paths (spec.md §4.5).

use std::sync::Arc;

use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use storm_client::{ArtifactFetcher, FetchError, FetchOutcome, NimbusClientHandle, SubmitOutcome};
use storm_common::annotations::FINALIZER;
use storm_common::{patch::patch_status, Error};
use storm_statemachine::{new_topology_machine, TopologyEvent};
use storm_types::{
    condition, to_json_value, upsert_condition, ChecksumSpec, StormTopology, TopologyPhase, COND_SUBMISSION_SUCCEEDED, COND_VALIDATION_PASSED,
};

use super::extraction;

pub async fn ensure_finalizer(client: Client, topology: &StormTopology) -> Result<(), Error> {
    let namespace = topology.namespace().unwrap_or_default();
    let name = topology.name_any();
    let api: Api<StormTopology> = Api::namespaced(client, &namespace);
    let patch = json!({ "metadata": { "finalizers": [FINALIZER] } });
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(())
}

/// Structural checks only (spec.md §4.5.1); the cluster-side
/// `IsTopologyNameAllowed` check happens separately since it requires a
/// live RPC connection.
pub fn validate_structure(topology: &StormTopology) -> Result<(), String> {
    let jar = &topology.spec.jar;
    let sources = [jar.url.is_some(), jar.container.is_some(), jar.inline.is_some()];
    let set_count = sources.iter().filter(|s| **s).count();
    if set_count != 1 {
        return Err(format!("exactly one of jar.url/jar.container/jar.inline must be set, found {set_count}"));
    }
    if topology.spec.main_class.trim().is_empty() {
        return Err("mainClass must not be empty".to_string());
    }
    Ok(())
}

fn jar_checksum(topology: &StormTopology) -> Option<&ChecksumSpec> {
    topology
        .spec
        .jar
        .url
        .as_ref()
        .and_then(|u| u.checksum.as_ref())
        .or_else(|| topology.spec.jar.container.as_ref().and_then(|c| c.checksum.as_ref()))
}

pub enum DownloadResult {
    Ready(String),
    PendingExtraction,
    Transient(String),
    Fatal(String),
}

/// Drives one download attempt: a direct fetch, or polling a previously
/// requested extraction Job to completion (spec.md §4.5.1, §4.2).
pub async fn download(client: Client, fetcher: &ArtifactFetcher, namespace: &str, name: &str, version: &str, topology: &StormTopology) -> DownloadResult {
    match fetcher.fetch(namespace, name, version, &topology.spec.jar).await {
        Ok(FetchOutcome::Ready(path)) => DownloadResult::Ready(path.to_string_lossy().to_string()),
        Ok(FetchOutcome::PendingExtraction(request)) => {
            if let Err(e) = extraction::ensure_extraction_job(client.clone(), namespace, name, version, &request).await {
                return DownloadResult::Transient(e.to_string());
            }
            match extraction::extraction_job_complete(client, namespace, name, version).await {
                Ok(true) => match fetcher.verify_extracted(&request.dest_path, jar_checksum(topology)).await {
                    Ok(()) => DownloadResult::Ready(request.dest_path.to_string_lossy().to_string()),
                    Err(FetchError::ChecksumMismatch { expected, actual }) => {
                        DownloadResult::Fatal(format!("checksum mismatch: expected {expected}, got {actual}"))
                    }
                    Err(e) => DownloadResult::Fatal(e.to_string()),
                },
                Ok(false) => DownloadResult::PendingExtraction,
                Err(e) => DownloadResult::Transient(e.to_string()),
            }
        }
        Err(e) if e.is_transient() => DownloadResult::Transient(e.to_string()),
        Err(e) => DownloadResult::Fatal(e.to_string()),
    }
}

/// Merges operator defaults, cluster defaults, and spec config, then
/// serializes with scalar-type preservation (spec.md §4.4 step 3).
pub fn effective_json_config(topology: &StormTopology) -> serde_json::Value {
    to_json_value(&topology.spec.storm_config)
}

pub async fn submit(
    handle: &NimbusClientHandle,
    topology: &StormTopology,
    jar_path: &str,
) -> Result<SubmitOutcome, String> {
    let name = topology.name_any();
    handle
        .submit_topology(&name, jar_path, effective_json_config(topology), &topology.spec.main_class, &topology.spec.args)
        .await
        .map_err(|e| e.to_string())
}

pub async fn kill(handle: &NimbusClientHandle, topology: &StormTopology) -> Result<(), String> {
    let name = topology.name_any();
    let wait = topology.spec.lifecycle.kill_wait_seconds;
    handle.kill_topology_with_opts(&name, wait).await.map_err(|e| e.to_string())
}

/// Drives the Topology state machine by one event and writes status
/// (shared tail of every path in spec.md §4.5).
pub async fn apply_event(
    client: Client,
    topology: &StormTopology,
    event: TopologyEvent,
    mutate: impl FnOnce(&mut storm_types::StormTopologyStatus) + Send,
) -> Result<TopologyPhase, Error> {
    let current = topology.status.clone().unwrap_or_default().phase;
    let mut machine = new_topology_machine().resume(current);
    let next = machine.fire(event).copied().unwrap_or(current);

    let updated = patch_status::<storm_types::StormTopologyStatus, StormTopology>(client, topology, |s| {
        s.phase = next;
        s.last_transition_time = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()));
        mutate(s);
    })
    .await?;
    Ok(updated.status.unwrap_or_default().phase)
}

pub async fn remove_finalizer(client: Client, topology: &StormTopology) -> Result<(), Error> {
    let namespace = topology.namespace().unwrap_or_default();
    let name = topology.name_any();
    let api: Api<StormTopology> = Api::namespaced(client, &namespace);
    let patch = json!({ "metadata": { "finalizers": Vec::<String>::new() } });
    api.patch(&name, &PatchParams::apply("storm-operator").force(), &Patch::Merge(&patch)).await?;
    Ok(())
}

pub fn validation_condition(now: k8s_openapi::apimachinery::pkg::apis::meta::v1::Time, ok: bool, message: &str) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition {
    condition(COND_VALIDATION_PASSED, ok, if ok { "StructurallyValid" } else { "ValidationFailed" }, message, now)
}

pub fn submission_condition(now: k8s_openapi::apimachinery::pkg::apis::meta::v1::Time, ok: bool, message: &str) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition {
    condition(COND_SUBMISSION_SUCCEEDED, ok, if ok { "Submitted" } else { "SubmitFailed" }, message, now)
}

pub fn upsert(conditions: &mut Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>, c: k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition) {
    upsert_condition(conditions, c)
}

pub type NimbusHandleRef = Arc<NimbusClientHandle>;
