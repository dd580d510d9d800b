//! Worker-pool provisioning for the topology submit path (spec.md §4.9):
//! decide whether the topology needs a dedicated pool, can share an
//! existing one, or must wait on cluster capacity, before committing a
//! submit.

use std::time::Duration;

use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

use storm_common::Error;
use storm_coordinator::{
    available_slots, decide_provisioning, evaluate_cluster_health, ready_for_new_topology, ClusterHealthInputs, ProvisioningDecision,
    ProvisionerInputs, ResourceLookup, SynthesizedPoolSpec,
};
use storm_types::{PodTemplateOverride, StormCluster, StormTopology, StormWorkerPool, StormWorkerPoolSpec, TopologyPhase};

use crate::workloads::owner_reference;

const CLUSTER_NOT_READY_WAIT: Duration = Duration::from_secs(300);

pub enum ProvisionOutcome {
    Proceed,
    Wait(Duration),
}

/// Runs the provisioner against live cluster/topology state and, when it
/// decides to create a pool, persists the child `StormWorkerPool` owned
/// by this topology (cascade-deleted by the framework when the topology
/// is removed, per spec.md §3 "Ownership").
pub async fn provision(
    client: Client,
    lookup: &dyn ResourceLookup,
    namespace: &str,
    topology: &StormTopology,
    cluster: &StormCluster,
) -> Result<ProvisionOutcome, Error> {
    let running = lookup.topologies_for_cluster(namespace, &topology.spec.cluster_ref).await?;
    let running_refs: Vec<&StormTopology> =
        running.iter().filter(|t| t.status.as_ref().map(|s| s.phase) == Some(TopologyPhase::Running)).collect();
    let slots = available_slots(&cluster.spec.supervisor, &running_refs);

    let cluster_status = cluster.status.clone().unwrap_or_default();
    let health = evaluate_cluster_health(&ClusterHealthInputs {
        nimbus_ready: cluster_status.nimbus_ready,
        nimbus_desired: cluster.spec.nimbus.replicas,
        supervisor_ready: cluster_status.supervisor_ready,
        supervisor_desired: cluster.spec.supervisor.replicas,
        ui_ready: if cluster_status.ui_ready { 1 } else { 0 },
        ui_desired: if cluster.spec.ui.enabled { 1 } else { 0 },
        storm_api_reachable: None,
    });
    if !ready_for_new_topology(health.overall, health.readiness_score, slots) {
        return Ok(ProvisionOutcome::Wait(CLUSTER_NOT_READY_WAIT));
    }

    let existing_pools = lookup.worker_pools_for_topology(namespace, &topology.name_any()).await?;
    let decision = decide_provisioning(&ProvisionerInputs {
        topology,
        existing_pools: &existing_pools,
        available_slots: slots,
        capacity_dependency_required: true,
    });

    match decision {
        ProvisioningDecision::Wait { recommended_wait } => Ok(ProvisionOutcome::Wait(recommended_wait)),
        ProvisioningDecision::Create { spec } => {
            create_pool(client, namespace, topology, cluster, spec).await?;
            Ok(ProvisionOutcome::Proceed)
        }
        ProvisioningDecision::UseExisting { .. } | ProvisioningDecision::None => Ok(ProvisionOutcome::Proceed),
    }
}

async fn create_pool(
    client: Client,
    namespace: &str,
    topology: &StormTopology,
    cluster: &StormCluster,
    spec: SynthesizedPoolSpec,
) -> Result<(), Error> {
    let name = format!("{}-pool", topology.name_any());
    let mut pool = StormWorkerPool::new(
        &name,
        StormWorkerPoolSpec {
            topology_ref: topology.name_any(),
            cluster_ref: cluster.name_any(),
            replicas: spec.replicas,
            template: PodTemplateOverride {
                cpu: Some(spec.cpu.request),
                memory: Some(spec.memory.request),
                labels: spec.labels,
                ..Default::default()
            },
        },
    );
    pool.metadata.namespace = Some(namespace.to_string());
    pool.metadata.owner_references = Some(vec![owner_reference(topology)]);

    let api: Api<StormWorkerPool> = Api::namespaced(client, namespace);
    match api.create(&PostParams::default(), &pool).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
