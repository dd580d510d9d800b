//! Side-effect requester for `FetchOutcome::PendingExtraction` (spec.md
//! §4.2, §9 Open Question 2): in `Job` mode the reconciler runs a
//! one-shot Kubernetes Job that copies the JAR out of the referenced
//! image onto the shared artifact cache; `InitContainer`/`Sidecar` modes
//! are the worker pool's responsibility, since they shape a worker pod's
//! template rather than a standalone resource.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use storm_client::ExtractionRequest;
use storm_common::Error;
use storm_types::ExtractionMode;

/// Deterministic Job name so a repeated reconcile against the same
/// pending extraction is an update, not a duplicate creation.
pub fn job_name(namespace: &str, name: &str, version: &str) -> String {
    format!("{name}-extract-{version}-{:x}", md5::compute(namespace))
}

pub async fn ensure_extraction_job(
    client: Client,
    namespace: &str,
    name: &str,
    version: &str,
    request: &ExtractionRequest,
) -> Result<(), Error> {
    if request.mode != ExtractionMode::Job {
        return Ok(());
    }

    let dest_dir = request.dest_path.parent().unwrap_or(&request.dest_path).to_string_lossy().to_string();
    let dest_file = request.dest_path.file_name().unwrap_or_default().to_string_lossy().to_string();
    let job_name = job_name(namespace, name, version);

    let job = Job {
        metadata: ObjectMeta {
            name: Some(job_name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(3),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![Container {
                        name: "extract".to_string(),
                        image: Some(request.image.clone()),
                        command: Some(vec![
                            "sh".to_string(),
                            "-c".to_string(),
                            format!("cp {} /artifact/{dest_file}", request.path_in_image),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "artifact".to_string(),
                            mount_path: "/artifact".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "artifact".to_string(),
                        host_path: Some(k8s_openapi::api::core::v1::HostPathVolumeSource {
                            path: dest_dir,
                            type_: Some("DirectoryOrCreate".to_string()),
                        }),
                        ..Default::default()
                    }]),
                    image_pull_secrets: if request.pull_secrets.is_empty() {
                        None
                    } else {
                        Some(
                            request
                                .pull_secrets
                                .iter()
                                .map(|s| k8s_openapi::api::core::v1::LocalObjectReference { name: s.clone() })
                                .collect(),
                        )
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    let api: Api<Job> = Api::namespaced(client, namespace);
    api.patch(&job_name, &PatchParams::apply("storm-operator").force(), &Patch::Apply(&job)).await?;
    Ok(())
}

pub async fn extraction_job_complete(client: Client, namespace: &str, name: &str, version: &str) -> Result<bool, Error> {
    let api: Api<Job> = Api::namespaced(client, namespace);
    let job_name = job_name(namespace, name, version);
    Ok(api
        .get_opt(&job_name)
        .await?
        .and_then(|j| j.status)
        .map(|s| s.succeeded.unwrap_or(0) > 0)
        .unwrap_or(false))
}
