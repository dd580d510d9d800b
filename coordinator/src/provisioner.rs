use std::collections::BTreeMap;
use std::time::Duration;

use storm_types::{StormCluster, StormTopology, StormWorkerPool, WorkerPoolPhase};

const WAIT_RECOMMENDATION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequirement {
    pub request: String,
    pub limit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedPoolSpec {
    pub replicas: i32,
    pub cpu: ResourceRequirement,
    pub memory: ResourceRequirement,
    pub labels: BTreeMap<String, String>,
    pub estimated_cost_per_hour: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningDecision {
    UseExisting { pool_name: String },
    Create { spec: SynthesizedPoolSpec },
    Wait { recommended_wait: Duration },
    None,
}

pub struct ProvisionerInputs<'a> {
    pub topology: &'a StormTopology,
    pub existing_pools: &'a [StormWorkerPool],
    pub available_slots: i32,
    /// Whether the topology→cluster dependency backing this decision is
    /// Required (a capacity shortfall then yields `Wait`) or advisory.
    pub capacity_dependency_required: bool,
}

/// Computes a provisioning decision for a topology (spec.md §4.9).
pub fn decide_provisioning(inputs: &ProvisionerInputs) -> ProvisioningDecision {
    let required_workers = inputs.topology.spec.workers.replicas.unwrap_or(1).max(1);

    if inputs.available_slots < required_workers && inputs.capacity_dependency_required {
        return ProvisioningDecision::Wait { recommended_wait: WAIT_RECOMMENDATION };
    }

    let topology_name = inputs.topology.metadata.name.clone().unwrap_or_default();
    if let Some(existing) = inputs.existing_pools.iter().find(|p| {
        p.spec.topology_ref == topology_name
            && p.status.as_ref().map(|s| s.phase) == Some(WorkerPoolPhase::Ready)
            && p.spec.replicas >= required_workers
    }) {
        return ProvisioningDecision::UseExisting {
            pool_name: existing.metadata.name.clone().unwrap_or_default(),
        };
    }

    if requires_dedicated_pool(inputs.topology, required_workers) {
        return ProvisioningDecision::Create { spec: synthesize_pool_spec(inputs.topology, required_workers) };
    }

    ProvisioningDecision::None
}

/// "declared resource overrides, custom worker heap, or replicas > 2"
/// (spec.md §4.9).
fn requires_dedicated_pool(topology: &StormTopology, required_workers: i32) -> bool {
    let w = &topology.spec.workers;
    w.cpu.is_some() || w.memory.is_some() || w.heap_mb.is_some() || required_workers > 2
}

fn synthesize_pool_spec(topology: &StormTopology, required_workers: i32) -> SynthesizedPoolSpec {
    let w = &topology.spec.workers;
    let cpu_request_millicores = w.cpu.as_deref().map(parse_cpu_millicores).unwrap_or(500);
    let memory_request_gb = w.memory.as_deref().map(parse_memory_gb).unwrap_or(1.0);

    let cpu = ResourceRequirement {
        request: format_millicores(cpu_request_millicores),
        limit: format_millicores(cpu_request_millicores * 2),
    };
    let memory_request_str = w.memory.clone().unwrap_or_else(|| "1Gi".to_string());
    let memory = ResourceRequirement { request: memory_request_str.clone(), limit: memory_request_str };

    let mut labels = BTreeMap::new();
    labels.insert("storm.apache.org/topology".to_string(), topology.metadata.name.clone().unwrap_or_default());

    let cost_per_worker_per_hour =
        (cpu_request_millicores as f64 / 1000.0) * 0.05 + memory_request_gb * 0.01 + 10.0 * 0.001;

    SynthesizedPoolSpec {
        replicas: required_workers,
        cpu,
        memory,
        labels,
        estimated_cost_per_hour: cost_per_worker_per_hour * required_workers as f64,
    }
}

fn parse_cpu_millicores(cpu: &str) -> i64 {
    if let Some(stripped) = cpu.strip_suffix('m') {
        stripped.parse().unwrap_or(0)
    } else {
        (cpu.parse::<f64>().unwrap_or(0.0) * 1000.0).round() as i64
    }
}

fn format_millicores(m: i64) -> String {
    format!("{m}m")
}

fn parse_memory_gb(mem: &str) -> f64 {
    let (value, unit) = mem
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|idx| mem.split_at(idx))
        .unwrap_or((mem, ""));
    let value: f64 = value.parse().unwrap_or(0.0);
    match unit {
        "Gi" => value,
        "Mi" => value / 1024.0,
        "Ki" => value / (1024.0 * 1024.0),
        "G" => value,
        "M" => value / 1000.0,
        _ => value / (1024.0 * 1024.0 * 1024.0),
    }
}

/// Does not depend on a cluster reference directly; retained for callers
/// needing the cluster's declared sizing alongside a provisioning
/// decision (e.g. logging context).
pub fn cluster_context_label(cluster: &StormCluster) -> String {
    cluster.metadata.name.clone().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_types::{JarSpec, StormTopologySpec, WorkerSizing};

    fn topology_with_workers(workers: WorkerSizing) -> StormTopology {
        let mut t = StormTopology::new(
            "t1",
            StormTopologySpec {
                cluster_ref: "c1".into(),
                jar: JarSpec::default(),
                main_class: "com.ex.Main".into(),
                args: vec![],
                storm_config: Default::default(),
                workers,
                lifecycle: Default::default(),
            },
        );
        t.metadata.name = Some("t1".into());
        t
    }

    #[test]
    fn small_default_topology_needs_no_dedicated_pool() {
        let t = topology_with_workers(WorkerSizing::default());
        let decision = decide_provisioning(&ProvisionerInputs {
            topology: &t,
            existing_pools: &[],
            available_slots: 10,
            capacity_dependency_required: true,
        });
        assert_eq!(decision, ProvisioningDecision::None);
    }

    #[test]
    fn custom_heap_forces_dedicated_pool() {
        let t = topology_with_workers(WorkerSizing { heap_mb: Some(2048), ..Default::default() });
        let decision = decide_provisioning(&ProvisionerInputs {
            topology: &t,
            existing_pools: &[],
            available_slots: 10,
            capacity_dependency_required: true,
        });
        assert!(matches!(decision, ProvisioningDecision::Create { .. }));
    }

    #[test]
    fn insufficient_capacity_with_required_dependency_yields_wait() {
        let t = topology_with_workers(WorkerSizing { replicas: Some(5), ..Default::default() });
        let decision = decide_provisioning(&ProvisionerInputs {
            topology: &t,
            existing_pools: &[],
            available_slots: 1,
            capacity_dependency_required: true,
        });
        assert_eq!(decision, ProvisioningDecision::Wait { recommended_wait: WAIT_RECOMMENDATION });
    }

    #[test]
    fn cpu_limit_is_double_request_and_memory_limit_equals_request() {
        let t = topology_with_workers(WorkerSizing {
            cpu: Some("500m".into()),
            memory: Some("2Gi".into()),
            ..Default::default()
        });
        let decision = decide_provisioning(&ProvisionerInputs {
            topology: &t,
            existing_pools: &[],
            available_slots: 10,
            capacity_dependency_required: true,
        });
        let ProvisioningDecision::Create { spec } = decision else { panic!("expected Create") };
        assert_eq!(spec.cpu.request, "500m");
        assert_eq!(spec.cpu.limit, "1000m");
        assert_eq!(spec.memory.request, "2Gi");
        assert_eq!(spec.memory.limit, "2Gi");
    }
}
