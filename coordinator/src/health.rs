use storm_types::{StormTopology, SupervisorSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Per-component rule from spec.md §4.7: "Healthy if ready ≥ desired;
/// Degraded if 0 < ready < desired; Unhealthy if ready = 0."
pub fn component_status(ready: i32, desired: i32) -> ComponentStatus {
    if ready <= 0 {
        ComponentStatus::Unhealthy
    } else if ready >= desired {
        ComponentStatus::Healthy
    } else {
        ComponentStatus::Degraded
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterHealthInputs {
    pub nimbus_ready: i32,
    pub nimbus_desired: i32,
    pub supervisor_ready: i32,
    pub supervisor_desired: i32,
    pub ui_ready: i32,
    pub ui_desired: i32,
    /// `None` when the Storm API probe was not attempted this cycle
    /// (e.g. no endpoint known yet); absence is treated like the
    /// component not being evaluated, not like failure.
    pub storm_api_reachable: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterHealth {
    pub nimbus: ComponentStatus,
    pub supervisor: ComponentStatus,
    pub ui: ComponentStatus,
    pub storm_api: Option<ComponentStatus>,
    pub overall: ComponentStatus,
    pub readiness_score: i32,
}

/// Aggregation rule from spec.md §4.7: "Unhealthy if any component is
/// Unhealthy AND none Healthy; Degraded if any Degraded or a mix; Healthy
/// if all Healthy."
fn aggregate(components: &[ComponentStatus]) -> ComponentStatus {
    let all_healthy = components.iter().all(|c| *c == ComponentStatus::Healthy);
    if all_healthy {
        return ComponentStatus::Healthy;
    }
    let any_unhealthy = components.iter().any(|c| *c == ComponentStatus::Unhealthy);
    let any_healthy = components.iter().any(|c| *c == ComponentStatus::Healthy);
    if any_unhealthy && !any_healthy {
        ComponentStatus::Unhealthy
    } else {
        ComponentStatus::Degraded
    }
}

pub fn evaluate_cluster_health(inputs: &ClusterHealthInputs) -> ClusterHealth {
    let nimbus = component_status(inputs.nimbus_ready, inputs.nimbus_desired);
    let supervisor = component_status(inputs.supervisor_ready, inputs.supervisor_desired);
    let ui = component_status(inputs.ui_ready, inputs.ui_desired);
    let storm_api = inputs
        .storm_api_reachable
        .map(|reachable| if reachable { ComponentStatus::Healthy } else { ComponentStatus::Unhealthy });

    let mut components = vec![nimbus, supervisor, ui];
    if let Some(storm_api) = storm_api {
        components.push(storm_api);
    }
    let overall = aggregate(&components);

    let healthy = components.iter().filter(|c| **c == ComponentStatus::Healthy).count() as i32;
    let degraded = components.iter().filter(|c| **c == ComponentStatus::Degraded).count() as i32;
    let total = components.len() as i32;
    let readiness_score = if total == 0 { 0 } else { (healthy * 100 + degraded * 50) / total };

    ClusterHealth { nimbus, supervisor, ui, storm_api, overall, readiness_score }
}

/// Worker-slot accounting (spec.md §9 Open Question 1, resolved): sum of
/// declared worker replicas across running topologies, falling back to one
/// slot per topology when `workers.replicas` is unset.
pub fn available_slots(supervisor: &SupervisorSpec, running_topologies: &[&StormTopology]) -> i32 {
    let total = supervisor.replicas * supervisor.slots_per_supervisor;
    let used: i32 = running_topologies.iter().map(|t| t.spec.workers.replicas.unwrap_or(1).max(1)).sum();
    total - used
}

/// "Ready for a new topology" predicate (spec.md §4.7).
pub fn ready_for_new_topology(overall: ComponentStatus, readiness_score: i32, available_slots: i32) -> bool {
    overall != ComponentStatus::Unhealthy && readiness_score >= 60 && available_slots >= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_status_matches_spec_thresholds() {
        assert_eq!(component_status(3, 3), ComponentStatus::Healthy);
        assert_eq!(component_status(1, 3), ComponentStatus::Degraded);
        assert_eq!(component_status(0, 3), ComponentStatus::Unhealthy);
    }

    #[test]
    fn all_healthy_components_yield_overall_healthy_and_score_100() {
        let inputs = ClusterHealthInputs {
            nimbus_ready: 1,
            nimbus_desired: 1,
            supervisor_ready: 3,
            supervisor_desired: 3,
            ui_ready: 1,
            ui_desired: 1,
            storm_api_reachable: Some(true),
        };
        let health = evaluate_cluster_health(&inputs);
        assert_eq!(health.overall, ComponentStatus::Healthy);
        assert_eq!(health.readiness_score, 100);
    }

    #[test]
    fn one_unhealthy_with_others_healthy_is_degraded_not_unhealthy() {
        let inputs = ClusterHealthInputs {
            nimbus_ready: 0,
            nimbus_desired: 1,
            supervisor_ready: 3,
            supervisor_desired: 3,
            ui_ready: 1,
            ui_desired: 1,
            storm_api_reachable: Some(true),
        };
        let health = evaluate_cluster_health(&inputs);
        assert_eq!(health.overall, ComponentStatus::Degraded);
    }

    #[test]
    fn all_unhealthy_is_overall_unhealthy() {
        let inputs = ClusterHealthInputs {
            nimbus_ready: 0,
            nimbus_desired: 1,
            supervisor_ready: 0,
            supervisor_desired: 3,
            ui_ready: 0,
            ui_desired: 1,
            storm_api_reachable: Some(false),
        };
        let health = evaluate_cluster_health(&inputs);
        assert_eq!(health.overall, ComponentStatus::Unhealthy);
    }

    #[test]
    fn readiness_score_always_in_bounds() {
        for n in 0..=5 {
            for d in 0..=5 {
                let score = evaluate_cluster_health(&ClusterHealthInputs {
                    nimbus_ready: n,
                    nimbus_desired: d,
                    supervisor_ready: n,
                    supervisor_desired: d,
                    ui_ready: n,
                    ui_desired: d,
                    storm_api_reachable: None,
                })
                .readiness_score;
                assert!((0..=100).contains(&score));
            }
        }
    }
}
