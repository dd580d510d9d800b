use std::collections::HashMap;

use storm_types::TopologyPhase;

use crate::engine::StateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyEvent {
    Validate,
    ValidationSuccess,
    ValidationFailed,
    DownloadComplete,
    DownloadFailed,
    SubmitSuccess,
    SubmitFailed,
    Suspend,
    TopologyUpdate,
    Kill,
    Error,
    Resume,
    UpdateComplete,
    KillComplete,
    Retry,
}

/// Builds the Topology transition table, the richest of the three (spec.md
/// §4.3). Every edge here is named explicitly in the specification.
pub fn new_topology_machine() -> StateMachine<TopologyPhase, TopologyEvent> {
    use TopologyEvent::*;
    use TopologyPhase::*;

    let mut transitions = HashMap::new();
    transitions.insert((Unknown, Validate), Validating);
    transitions.insert((Pending, Validate), Validating);
    transitions.insert((Validating, ValidationSuccess), Downloading);
    transitions.insert((Validating, ValidationFailed), Failed);
    transitions.insert((Downloading, DownloadComplete), Submitting);
    transitions.insert((Downloading, DownloadFailed), Failed);
    transitions.insert((Submitting, SubmitSuccess), Running);
    transitions.insert((Submitting, SubmitFailed), Failed);
    transitions.insert((Running, Suspend), Suspended);
    transitions.insert((Running, TopologyUpdate), Updating);
    transitions.insert((Running, Kill), Killing);
    transitions.insert((Running, Error), Failed);
    transitions.insert((Suspended, Resume), Running);
    transitions.insert((Suspended, Kill), Killing);
    transitions.insert((Updating, UpdateComplete), Running);
    transitions.insert((Updating, Error), Failed);
    transitions.insert((Killing, KillComplete), Killed);
    transitions.insert((Killing, Error), Failed);
    transitions.insert((Failed, Retry), Pending);
    transitions.insert((Failed, Kill), Killed);

    StateMachine::new(Unknown, transitions).with_terminal_states([Killed])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_from_unknown_to_running() {
        let mut m = new_topology_machine();
        m.fire(TopologyEvent::Validate).unwrap();
        m.fire(TopologyEvent::ValidationSuccess).unwrap();
        m.fire(TopologyEvent::DownloadComplete).unwrap();
        m.fire(TopologyEvent::SubmitSuccess).unwrap();
        assert_eq!(*m.current(), TopologyPhase::Running);
    }

    #[test]
    fn suspend_then_resume_round_trips() {
        let mut m = new_topology_machine();
        m.fire(TopologyEvent::Validate).unwrap();
        m.fire(TopologyEvent::ValidationSuccess).unwrap();
        m.fire(TopologyEvent::DownloadComplete).unwrap();
        m.fire(TopologyEvent::SubmitSuccess).unwrap();
        m.fire(TopologyEvent::Suspend).unwrap();
        assert_eq!(*m.current(), TopologyPhase::Suspended);
        m.fire(TopologyEvent::Resume).unwrap();
        assert_eq!(*m.current(), TopologyPhase::Running);
    }

    #[test]
    fn failed_topology_can_be_killed_directly() {
        let mut m = new_topology_machine();
        m.fire(TopologyEvent::Validate).unwrap();
        m.fire(TopologyEvent::ValidationFailed).unwrap();
        assert_eq!(*m.current(), TopologyPhase::Failed);
        m.fire(TopologyEvent::Kill).unwrap();
        assert_eq!(*m.current(), TopologyPhase::Killed);
    }

    #[test]
    fn killed_is_terminal_and_rejects_further_events() {
        let mut m = new_topology_machine();
        m.fire(TopologyEvent::Validate).unwrap();
        m.fire(TopologyEvent::ValidationFailed).unwrap();
        m.fire(TopologyEvent::Kill).unwrap();
        assert!(m.fire(TopologyEvent::Retry).is_err());
    }
}
