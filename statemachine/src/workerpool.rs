use std::collections::HashMap;

use storm_types::WorkerPoolPhase;

use crate::engine::StateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerPoolEvent {
    Initialize,
    BeginCreate,
    CreateComplete,
    Scale,
    ScaleComplete,
    PoolUpdate,
    UpdateComplete,
    Drain,
    DrainComplete,
    Delete,
    DeleteComplete,
    Error,
    Recover,
}

/// Builds the WorkerPool transition table (spec.md §4.3): "Unknown →
/// Creating → Ready → {Scaling, Updating, Draining, Deleting};
/// Scaling/Updating → Ready | Failed; Draining → Ready | Deleting;
/// Deleting → Deleted; Failed → Pending (Recover) | Deleting." As with the
/// Cluster machine, the source text elides the Unknown→Pending→Creating
/// leg implied by `WorkerPoolPhase` declaring a `Pending` variant; this
/// implementation names those edges `Initialize`/`BeginCreate` to match.
pub fn new_worker_pool_machine() -> StateMachine<WorkerPoolPhase, WorkerPoolEvent> {
    use WorkerPoolEvent::*;
    use WorkerPoolPhase::*;

    let mut transitions = HashMap::new();
    transitions.insert((Unknown, Initialize), Pending);
    transitions.insert((Pending, BeginCreate), Creating);
    transitions.insert((Creating, CreateComplete), Ready);
    transitions.insert((Ready, Scale), Scaling);
    transitions.insert((Ready, PoolUpdate), Updating);
    transitions.insert((Ready, Drain), Draining);
    transitions.insert((Ready, Delete), Deleting);
    transitions.insert((Scaling, ScaleComplete), Ready);
    transitions.insert((Scaling, Error), Failed);
    transitions.insert((Updating, UpdateComplete), Ready);
    transitions.insert((Updating, Error), Failed);
    transitions.insert((Draining, DrainComplete), Ready);
    transitions.insert((Draining, Delete), Deleting);
    transitions.insert((Deleting, DeleteComplete), Deleted);
    transitions.insert((Failed, Recover), Pending);
    transitions.insert((Failed, Delete), Deleting);

    StateMachine::new(Unknown, transitions).with_terminal_states([Deleted])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_unknown_to_ready() {
        let mut m = new_worker_pool_machine();
        m.fire(WorkerPoolEvent::Initialize).unwrap();
        m.fire(WorkerPoolEvent::BeginCreate).unwrap();
        m.fire(WorkerPoolEvent::CreateComplete).unwrap();
        assert_eq!(*m.current(), WorkerPoolPhase::Ready);
    }

    #[test]
    fn scaling_failure_then_recovery_reaches_deleting() {
        let mut m = new_worker_pool_machine();
        m.fire(WorkerPoolEvent::Initialize).unwrap();
        m.fire(WorkerPoolEvent::BeginCreate).unwrap();
        m.fire(WorkerPoolEvent::CreateComplete).unwrap();
        m.fire(WorkerPoolEvent::Scale).unwrap();
        m.fire(WorkerPoolEvent::Error).unwrap();
        assert_eq!(*m.current(), WorkerPoolPhase::Failed);
        m.fire(WorkerPoolEvent::Delete).unwrap();
        assert_eq!(*m.current(), WorkerPoolPhase::Deleting);
    }

    #[test]
    fn draining_can_go_straight_to_deleting() {
        let mut m = new_worker_pool_machine();
        m.fire(WorkerPoolEvent::Initialize).unwrap();
        m.fire(WorkerPoolEvent::BeginCreate).unwrap();
        m.fire(WorkerPoolEvent::CreateComplete).unwrap();
        m.fire(WorkerPoolEvent::Drain).unwrap();
        m.fire(WorkerPoolEvent::Delete).unwrap();
        m.fire(WorkerPoolEvent::DeleteComplete).unwrap();
        assert_eq!(*m.current(), WorkerPoolPhase::Deleted);
    }
}
