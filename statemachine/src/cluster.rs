use std::collections::HashMap;

use storm_types::ClusterPhase;

use crate::engine::StateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    Initialize,
    BeginCreate,
    CreateComplete,
    ClusterUpdate,
    UpdateComplete,
    Error,
    Terminate,
    Recover,
}

/// Builds the Cluster transition table (spec.md §4.3): "Unknown → Pending
/// → Creating → Running → {Updating, Failed, Terminating}; Failed →
/// Pending (Recover); Updating → Running | Failed." The edges into Pending
/// and Creating are unnamed in the source text; `Initialize`/`BeginCreate`/
/// `CreateComplete` are this implementation's names for them, chosen to
/// read the same way as the explicitly-named Topology edges.
pub fn new_cluster_machine() -> StateMachine<ClusterPhase, ClusterEvent> {
    use ClusterEvent::*;
    use ClusterPhase::*;

    let mut transitions = HashMap::new();
    transitions.insert((Unknown, Initialize), Pending);
    transitions.insert((Pending, BeginCreate), Creating);
    transitions.insert((Creating, CreateComplete), Running);
    transitions.insert((Running, ClusterUpdate), Updating);
    transitions.insert((Running, Error), Failed);
    transitions.insert((Running, Terminate), Terminating);
    transitions.insert((Updating, UpdateComplete), Running);
    transitions.insert((Updating, Error), Failed);
    transitions.insert((Failed, Recover), Pending);

    StateMachine::new(Unknown, transitions).with_terminal_states([Terminating])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_unknown_through_running() {
        let mut m = new_cluster_machine();
        m.fire(ClusterEvent::Initialize).unwrap();
        m.fire(ClusterEvent::BeginCreate).unwrap();
        m.fire(ClusterEvent::CreateComplete).unwrap();
        assert_eq!(*m.current(), ClusterPhase::Running);
    }

    #[test]
    fn failed_recovers_to_pending() {
        let mut m = new_cluster_machine();
        m.fire(ClusterEvent::Initialize).unwrap();
        m.fire(ClusterEvent::BeginCreate).unwrap();
        m.fire(ClusterEvent::CreateComplete).unwrap();
        m.fire(ClusterEvent::Error).unwrap();
        assert_eq!(*m.current(), ClusterPhase::Failed);
        m.fire(ClusterEvent::Recover).unwrap();
        assert_eq!(*m.current(), ClusterPhase::Pending);
    }

    #[test]
    fn all_declared_states_validate() {
        let m = new_cluster_machine()
            .with_handler(ClusterPhase::Running, Box::new(|_| {}))
            .with_handler(ClusterPhase::Failed, Box::new(|_| {}))
            .with_handler(ClusterPhase::Terminating, Box::new(|_| {}));
        assert!(m.validate(&ClusterPhase::Unknown).is_ok());
    }
}
