use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// One step recorded to the append-only history (spec.md §4.3): "A
/// transition records `(from, to, event, timestamp, error?)`".
#[derive(Debug, Clone)]
pub struct TransitionRecord<S, E> {
    pub from: S,
    pub to: S,
    pub event: E,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
#[error("no transition for state {state:?} on event {event:?}")]
pub struct NoTransition<S: Debug, E: Debug> {
    pub state: S,
    pub event: E,
}

#[derive(Debug, Error)]
pub enum ValidationError<S: Debug> {
    #[error("state {0:?} has a handler but is unreachable from the initial state")]
    Unreachable(S),
    #[error("state {0:?} has a handler, is non-terminal, and has no outgoing transitions")]
    DeadEnd(S),
}

type StateHandler<S> = Box<dyn Fn(&S) + Send + Sync>;
type TransitionHook<S, E> = Box<dyn Fn(&S, &E, &S) + Send + Sync>;

/// A generic, pure transition-table state machine (spec.md §4.3): initial
/// state, a transition map `(state, event) -> state`, optional per-state
/// handlers, an optional global transition hook, and an append-only
/// history. Used identically by the Cluster, Topology, and WorkerPool
/// machines — only the transition tables differ.
pub struct StateMachine<S, E> {
    current: S,
    transitions: HashMap<(S, E), S>,
    terminal_states: HashSet<S>,
    handlers: HashMap<S, StateHandler<S>>,
    hook: Option<TransitionHook<S, E>>,
    history: Vec<TransitionRecord<S, E>>,
}

impl<S, E> StateMachine<S, E>
where
    S: Eq + Hash + Clone + Debug,
    E: Eq + Hash + Clone + Debug,
{
    pub fn new(initial: S, transitions: HashMap<(S, E), S>) -> Self {
        Self {
            current: initial,
            transitions,
            terminal_states: HashSet::new(),
            handlers: HashMap::new(),
            hook: None,
            history: Vec::new(),
        }
    }

    pub fn with_terminal_states(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.terminal_states.extend(states);
        self
    }

    /// Resumes the machine at `state`, bypassing `initial`. Reconcilers
    /// build a fresh machine on every reconcile and need to resume from
    /// the phase already persisted on the resource's status rather than
    /// replaying the full event history.
    pub fn resume(mut self, state: S) -> Self {
        self.current = state;
        self
    }

    pub fn with_handler(mut self, state: S, handler: StateHandler<S>) -> Self {
        self.handlers.insert(state, handler);
        self
    }

    pub fn with_hook(mut self, hook: TransitionHook<S, E>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn current(&self) -> &S {
        &self.current
    }

    pub fn history(&self) -> &[TransitionRecord<S, E>] {
        &self.history
    }

    /// Apply `event` from the current state. Unknown events reject with
    /// `NoTransition` and leave `current` untouched; the attempt is still
    /// not recorded to history, matching "reject" rather than "transition
    /// to an error state".
    pub fn fire(&mut self, event: E) -> Result<&S, NoTransition<S, E>> {
        let key = (self.current.clone(), event.clone());
        let Some(next) = self.transitions.get(&key).cloned() else {
            return Err(NoTransition { state: self.current.clone(), event });
        };
        let from = self.current.clone();
        if let Some(hook) = &self.hook {
            hook(&from, &event, &next);
        }
        self.current = next.clone();
        if let Some(handler) = self.handlers.get(&next) {
            handler(&next);
        }
        self.history.push(TransitionRecord {
            from,
            to: next,
            event,
            timestamp: Utc::now(),
            error: None,
        });
        Ok(&self.current)
    }

    /// Record a failed attempt at an external operation without changing
    /// state (used by reconcilers to keep the diagnostic history complete
    /// even when the underlying action, not the machine, failed).
    pub fn record_error(&mut self, event: E, error: impl Into<String>) {
        let from = self.current.clone();
        self.history.push(TransitionRecord {
            from: from.clone(),
            to: from,
            event,
            timestamp: Utc::now(),
            error: Some(error.into()),
        });
    }

    /// "At startup each machine validates that every state with a handler
    /// is reachable and every non-terminal handler-bearing state has
    /// outgoing transitions" (spec.md §4.3).
    pub fn validate(&self, initial: &S) -> Result<(), ValidationError<S>> {
        let reachable = reachable_states(initial, &self.transitions);
        for state in self.handlers.keys() {
            if !reachable.contains(state) {
                return Err(ValidationError::Unreachable(state.clone()));
            }
            let has_outgoing = self.transitions.keys().any(|(from, _)| from == state);
            if !has_outgoing && !self.terminal_states.contains(state) {
                return Err(ValidationError::DeadEnd(state.clone()));
            }
        }
        Ok(())
    }
}

fn reachable_states<S, E>(initial: &S, transitions: &HashMap<(S, E), S>) -> HashSet<S>
where
    S: Eq + Hash + Clone,
    E: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(initial.clone());
    queue.push_back(initial.clone());
    while let Some(state) = queue.pop_front() {
        for ((from, _), to) in transitions.iter() {
            if from == &state && seen.insert(to.clone()) {
                queue.push_back(to.clone());
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        A,
        B,
        C,
    }
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum E {
        Go,
        Finish,
    }

    fn machine() -> StateMachine<S, E> {
        let mut t = HashMap::new();
        t.insert((S::A, E::Go), S::B);
        t.insert((S::B, E::Finish), S::C);
        StateMachine::new(S::A, t).with_terminal_states([S::C])
    }

    #[test]
    fn unknown_event_rejects_without_moving_state() {
        let mut m = machine();
        let err = m.fire(E::Finish).unwrap_err();
        assert_eq!(err.state, S::A);
        assert_eq!(*m.current(), S::A);
    }

    #[test]
    fn successful_transition_appends_to_history() {
        let mut m = machine();
        m.fire(E::Go).unwrap();
        assert_eq!(*m.current(), S::B);
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.history()[0].from, S::A);
        assert_eq!(m.history()[0].to, S::B);
    }

    #[test]
    fn validate_detects_unreachable_handler_state() {
        let mut t = HashMap::new();
        t.insert((S::A, E::Go), S::B);
        let m: StateMachine<S, E> = StateMachine::new(S::A, t)
            .with_terminal_states([S::B])
            .with_handler(S::C, Box::new(|_| {}));
        assert!(matches!(m.validate(&S::A), Err(ValidationError::Unreachable(S::C))));
    }

    #[test]
    fn validate_detects_dead_end_handler_state() {
        let mut t = HashMap::new();
        t.insert((S::A, E::Go), S::B);
        let m: StateMachine<S, E> =
            StateMachine::new(S::A, t).with_handler(S::B, Box::new(|_| {}));
        assert!(matches!(m.validate(&S::A), Err(ValidationError::DeadEnd(S::B))));
    }
}
