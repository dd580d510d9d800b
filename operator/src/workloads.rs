//! Desired-workload synthesis shared by the Cluster and WorkerPool
//! reconcilers (spec.md §4.4 step 3). Pure functions building Kubernetes
//! object literals; reconcilers apply them via server-side apply.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap as K8sConfigMap, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use storm_types::{PodTemplateOverride, StormCluster};

pub const NIMBUS_PORT: i32 = 6627;
pub const UI_PORT: i32 = 8080;

pub fn component_labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("storm.apache.org/cluster".to_string(), cluster_name.to_string());
    labels.insert("storm.apache.org/component".to_string(), component.to_string());
    labels
}

pub fn owner_reference<K>(owner: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Effective `storm.yaml` ConfigMap for a cluster: ZooKeeper connection,
/// chroot root, and free-form `stormConfig`, rendered with scalar-type
/// preservation (spec.md §4.4 step 3, §6).
pub fn storm_yaml_configmap(cluster: &StormCluster, spec_hash: &str) -> K8sConfigMap {
    let name = cluster.name_any();
    let mut merged = cluster.spec.storm_config.clone();
    merged.insert(
        "storm.zookeeper.servers".to_string(),
        storm_types::ConfigValue::List(
            cluster.spec.zookeeper.servers.iter().cloned().map(storm_types::ConfigValue::String).collect(),
        ),
    );
    merged.insert("storm.zookeeper.root".to_string(), storm_types::ConfigValue::String(cluster.spec.zookeeper.root.clone()));
    merged.insert(
        "storm.zookeeper.connection.timeout".to_string(),
        storm_types::ConfigValue::Int(cluster.spec.zookeeper.connect_timeout_ms as i64),
    );
    merged.insert(
        "storm.zookeeper.session.timeout".to_string(),
        storm_types::ConfigValue::Int(cluster.spec.zookeeper.session_timeout_ms as i64),
    );

    let mut data = BTreeMap::new();
    data.insert("storm.yaml".to_string(), storm_types::render_storm_yaml(&merged));

    let mut labels = component_labels(&name, "config");
    labels.insert(storm_common::annotations::SPEC_HASH_ANNOTATION.to_string(), spec_hash.to_string());

    K8sConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("{name}-config")),
            namespace: cluster.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

pub fn nimbus_headless_service(cluster: &StormCluster) -> Service {
    let name = cluster.name_any();
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{name}-nimbus")),
            namespace: cluster.namespace(),
            labels: Some(component_labels(&name, "nimbus")),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(component_labels(&name, "nimbus")),
            ports: Some(vec![ServicePort {
                name: Some("nimbus".to_string()),
                port: NIMBUS_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn nimbus_statefulset(cluster: &StormCluster, spec_hash: &str) -> StatefulSet {
    let name = cluster.name_any();
    let labels = component_labels(&name, "nimbus");
    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert(storm_common::annotations::SPEC_HASH_ANNOTATION.to_string(), spec_hash.to_string());

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(format!("{name}-nimbus")),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(cluster.spec.nimbus.replicas),
            service_name: format!("{name}-nimbus"),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels.clone()), annotations: Some(pod_annotations), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "nimbus".to_string(),
                        image: Some(cluster.spec.image.clone()),
                        command: Some(vec!["storm".to_string(), "nimbus".to_string()]),
                        ports: Some(vec![ContainerPort { name: Some("nimbus".to_string()), container_port: NIMBUS_PORT, ..Default::default() }]),
                        volume_mounts: Some(vec![k8s_openapi::api::core::v1::VolumeMount {
                            name: "storm-config".to_string(),
                            mount_path: "/conf".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![k8s_openapi::api::core::v1::Volume {
                        name: "storm-config".to_string(),
                        config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                            name: format!("{name}-config"),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn supervisor_deployment(cluster: &StormCluster, spec_hash: &str) -> Deployment {
    let name = cluster.name_any();
    let labels = component_labels(&name, "supervisor");
    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert(storm_common::annotations::SPEC_HASH_ANNOTATION.to_string(), spec_hash.to_string());

    Deployment {
        metadata: ObjectMeta {
            name: Some(format!("{name}-supervisor")),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(cluster.spec.supervisor.replicas),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels.clone()), annotations: Some(pod_annotations), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "supervisor".to_string(),
                        image: Some(cluster.spec.image.clone()),
                        command: Some(vec!["storm".to_string(), "supervisor".to_string()]),
                        env: Some(vec![EnvVar {
                            name: "STORM_SLOTS_PER_SUPERVISOR".to_string(),
                            value: Some(cluster.spec.supervisor.slots_per_supervisor.to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![k8s_openapi::api::core::v1::VolumeMount {
                            name: "storm-config".to_string(),
                            mount_path: "/conf".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![k8s_openapi::api::core::v1::Volume {
                        name: "storm-config".to_string(),
                        config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                            name: format!("{name}-config"),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ui_deployment(cluster: &StormCluster, spec_hash: &str) -> Deployment {
    let name = cluster.name_any();
    let labels = component_labels(&name, "ui");
    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert(storm_common::annotations::SPEC_HASH_ANNOTATION.to_string(), spec_hash.to_string());
    let resources = ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cluster.spec.ui.cpu.clone().unwrap_or_else(|| "100m".to_string()))),
            ("memory".to_string(), Quantity(cluster.spec.ui.memory.clone().unwrap_or_else(|| "256Mi".to_string()))),
        ])),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(format!("{name}-ui")),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels.clone()), annotations: Some(pod_annotations), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "ui".to_string(),
                        image: Some(cluster.spec.image.clone()),
                        command: Some(vec!["storm".to_string(), "ui".to_string()]),
                        ports: Some(vec![ContainerPort { name: Some("ui".to_string()), container_port: UI_PORT, ..Default::default() }]),
                        resources: Some(resources),
                        volume_mounts: Some(vec![k8s_openapi::api::core::v1::VolumeMount {
                            name: "storm-config".to_string(),
                            mount_path: "/conf".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![k8s_openapi::api::core::v1::Volume {
                        name: "storm-config".to_string(),
                        config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                            name: format!("{name}-config"),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ui_service(cluster: &StormCluster) -> Service {
    let name = cluster.name_any();
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{name}-ui")),
            namespace: cluster.namespace(),
            labels: Some(component_labels(&name, "ui")),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(component_labels(&name, "ui")),
            ports: Some(vec![ServicePort { name: Some("ui".to_string()), port: UI_PORT, ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Translates a worker pool's declared/overridden sizing into a
/// `ResourceRequirements` (spec.md §4.9: CPU limit = 2x request, memory
/// limit = request).
pub fn worker_resources(cpu: Option<&str>, memory: Option<&str>) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some(cpu) = cpu {
        requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        limits.insert("cpu".to_string(), Quantity(double_cpu(cpu)));
    }
    if let Some(memory) = memory {
        requests.insert("memory".to_string(), Quantity(memory.to_string()));
        limits.insert("memory".to_string(), Quantity(memory.to_string()));
    }
    ResourceRequirements {
        requests: if requests.is_empty() { None } else { Some(requests) },
        limits: if limits.is_empty() { None } else { Some(limits) },
        ..Default::default()
    }
}

fn double_cpu(cpu: &str) -> String {
    if let Some(stripped) = cpu.strip_suffix('m') {
        let millis: i64 = stripped.parse().unwrap_or(0);
        format!("{}m", millis * 2)
    } else if let Ok(cores) = cpu.parse::<f64>() {
        format!("{}m", (cores * 2000.0).round() as i64)
    } else {
        cpu.to_string()
    }
}

pub fn tolerations_from(strings: &[String]) -> Vec<Toleration> {
    strings
        .iter()
        .map(|key| Toleration { key: Some(key.clone()), operator: Some("Exists".to_string()), ..Default::default() })
        .collect()
}

pub fn merge_template(base_labels: &BTreeMap<String, String>, template: &PodTemplateOverride) -> BTreeMap<String, String> {
    let mut merged = base_labels.clone();
    merged.extend(template.labels.clone());
    merged
}

/// Synthesizes the Deployment backing a worker pool's execution slots
/// (spec.md §4.9 step 2): base image from the owning cluster unless the
/// template overrides it, sizing from `worker_resources`, and the pool's
/// `PodTemplateOverride` layered on top of the pool/topology labels.
pub fn worker_pool_deployment(pool: &storm_types::StormWorkerPool, cluster: &StormCluster, spec_hash: &str) -> Deployment {
    let pool_name = pool.name_any();
    let mut labels = BTreeMap::new();
    labels.insert("storm.apache.org/cluster".to_string(), cluster.name_any());
    labels.insert("storm.apache.org/topology".to_string(), pool.spec.topology_ref.clone());
    labels.insert("storm.apache.org/worker-pool".to_string(), pool_name.clone());
    let labels = merge_template(&labels, &pool.spec.template);

    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert(storm_common::annotations::SPEC_HASH_ANNOTATION.to_string(), spec_hash.to_string());

    let image = pool.spec.template.container_image_override.clone().unwrap_or_else(|| cluster.spec.image.clone());
    let resources = worker_resources(pool.spec.template.cpu.as_deref(), pool.spec.template.memory.as_deref());
    let tolerations = tolerations_from(&pool.spec.template.tolerations);

    Deployment {
        metadata: ObjectMeta {
            name: Some(format!("{pool_name}-workers")),
            namespace: pool.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(pool)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(pool.spec.replicas),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels.clone()), annotations: Some(pod_annotations), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "worker".to_string(),
                        image: Some(image),
                        command: Some(vec!["storm".to_string(), "supervisor".to_string()]),
                        resources: Some(resources),
                        ..Default::default()
                    }],
                    node_selector: if pool.spec.template.node_selector.is_empty() {
                        None
                    } else {
                        Some(pool.spec.template.node_selector.clone())
                    },
                    tolerations: if tolerations.is_empty() { None } else { Some(tolerations) },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
