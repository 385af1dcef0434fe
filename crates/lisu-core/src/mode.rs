//! Operating modes with guarded state transitions
//!
//! A `Mode` governs which commands are legal while it is active and carries
//! a small state machine of its own: named states, an ordered transition
//! graph with equality guards over state variables, and an append-only
//! transition history. Modes are read-mostly and may be shared across
//! devices.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::observer::{ModeObserver, ObserverSet};
use crate::value::ParamValue;

/// Reserved start state of every mode
pub const INITIAL_STATE: &str = "initial";

/// One candidate transition out of a state.
///
/// Conditions are conjunctive equality guards over state variables; a
/// variable that is not set fails its condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRule {
    pub to_state: String,
    pub conditions: BTreeMap<String, ParamValue>,
}

/// One entry of the append-only transition history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_state: String,
    pub to_state: String,
    pub timestamp: DateTime<Utc>,
}

/// Why a transition was denied
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("No transitions defined from state: {from}")]
    NoTransitionsFrom { from: String },

    #[error("No transition defined to state: {to}")]
    NoCandidate { to: String },

    #[error("Condition not met: {variable} = {expected}")]
    ConditionNotMet {
        variable: String,
        expected: ParamValue,
    },
}

/// Event payload delivered to mode observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModeEvent {
    StateChanged {
        from_state: String,
        to_state: String,
    },
    TransitionFailed {
        message: String,
    },
    VariableChanged {
        name: String,
        value: ParamValue,
    },
}

/// Fixed-schema snapshot of a mode's current state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeStateInfo {
    pub mode_id: String,
    pub name: String,
    pub current_state: String,
    pub state_variables: BTreeMap<String, ParamValue>,
    pub allowed_commands: Vec<String>,
    pub required_commands: Vec<String>,
}

/// A named operating mode with a guarded transition graph
pub struct Mode {
    mode_id: String,
    name: String,
    description: String,

    allowed_commands: RwLock<Vec<String>>,
    required_commands: RwLock<Vec<String>>,
    state_variables: RwLock<BTreeMap<String, ParamValue>>,
    transitions: RwLock<BTreeMap<String, Vec<TransitionRule>>>,
    current_state: RwLock<String>,
    history: RwLock<Vec<TransitionRecord>>,

    observers: ObserverSet<dyn ModeObserver>,
}

impl Mode {
    pub fn new(
        mode_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            mode_id: mode_id.into(),
            name: name.into(),
            description: description.into(),
            allowed_commands: RwLock::new(Vec::new()),
            required_commands: RwLock::new(Vec::new()),
            state_variables: RwLock::new(BTreeMap::new()),
            transitions: RwLock::new(BTreeMap::new()),
            current_state: RwLock::new(INITIAL_STATE.to_string()),
            history: RwLock::new(Vec::new()),
            observers: ObserverSet::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn mode_id(&self) -> &str {
        &self.mode_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn current_state(&self) -> String {
        self.current_state.read().clone()
    }

    pub fn allowed_commands(&self) -> Vec<String> {
        self.allowed_commands.read().clone()
    }

    pub fn required_commands(&self) -> Vec<String> {
        self.required_commands.read().clone()
    }

    pub fn state_variables(&self) -> BTreeMap<String, ParamValue> {
        self.state_variables.read().clone()
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn add_observer(&self, observer: &Arc<dyn ModeObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ModeObserver>) {
        self.observers.unsubscribe(observer);
    }

    fn notify_observers(&self, event: &ModeEvent) {
        self.observers.notify(|o| o.on_mode_state_changed(self, event));
    }

    // =========================================================================
    // Command legality
    // =========================================================================

    /// Allow a command in this mode. Adding an already-allowed command is a
    /// no-op (its required flag is left untouched).
    pub fn add_command(&self, command_id: &str, required: bool) {
        let mut allowed = self.allowed_commands.write();
        if allowed.iter().any(|c| c == command_id) {
            return;
        }
        allowed.push(command_id.to_string());
        if required {
            self.required_commands.write().push(command_id.to_string());
        }
    }

    /// Remove a command from both the allowed and required sets.
    pub fn remove_command(&self, command_id: &str) {
        self.allowed_commands.write().retain(|c| c != command_id);
        self.required_commands.write().retain(|c| c != command_id);
    }

    /// Pure membership test; the caller consults this before invoking a
    /// command on a device in this mode.
    pub fn is_command_allowed(&self, command_id: &str) -> bool {
        self.allowed_commands.read().iter().any(|c| c == command_id)
    }

    // =========================================================================
    // Transition graph
    // =========================================================================

    /// Append a candidate transition. Candidates are kept in declaration
    /// order and never deduplicated.
    pub fn add_transition(
        &self,
        from_state: &str,
        to_state: &str,
        conditions: BTreeMap<String, ParamValue>,
    ) {
        self.transitions
            .write()
            .entry(from_state.to_string())
            .or_default()
            .push(TransitionRule {
                to_state: to_state.to_string(),
                conditions,
            });
    }

    /// Check whether a transition to `to_state` is currently legal.
    ///
    /// Candidates out of the current state are scanned in declaration order
    /// and only the first one targeting `to_state` is evaluated — a later
    /// candidate to the same target is never consulted, even if its
    /// conditions would hold.
    pub fn can_transition_to(&self, to_state: &str) -> Result<(), TransitionError> {
        let current = self.current_state();
        let transitions = self.transitions.read();
        let candidates = match transitions.get(&current) {
            Some(candidates) if !candidates.is_empty() => candidates,
            _ => return Err(TransitionError::NoTransitionsFrom { from: current }),
        };

        let variables = self.state_variables.read();
        for rule in candidates {
            if rule.to_state != to_state {
                continue;
            }
            for (variable, expected) in &rule.conditions {
                let satisfied = variables.get(variable).map_or(false, |v| v == expected);
                if !satisfied {
                    return Err(TransitionError::ConditionNotMet {
                        variable: variable.clone(),
                        expected: expected.clone(),
                    });
                }
            }
            return Ok(());
        }

        Err(TransitionError::NoCandidate {
            to: to_state.to_string(),
        })
    }

    /// Attempt the transition. On denial the state and history are left
    /// untouched and observers receive `transition_failed`.
    pub fn transition_to(&self, to_state: &str) -> bool {
        if let Err(e) = self.can_transition_to(to_state) {
            warn!(mode_id = %self.mode_id, to_state, error = %e, "transition denied");
            self.notify_observers(&ModeEvent::TransitionFailed {
                message: e.to_string(),
            });
            return false;
        }

        // Capture the prior state before updating so history and the
        // state_changed payload carry the true from/to pair.
        let from_state = {
            let mut current = self.current_state.write();
            std::mem::replace(&mut *current, to_state.to_string())
        };

        self.history.write().push(TransitionRecord {
            from_state: from_state.clone(),
            to_state: to_state.to_string(),
            timestamp: Utc::now(),
        });

        info!(mode_id = %self.mode_id, %from_state, to_state, "state changed");
        self.notify_observers(&ModeEvent::StateChanged {
            from_state,
            to_state: to_state.to_string(),
        });
        true
    }

    // =========================================================================
    // State variables
    // =========================================================================

    /// Unconditionally set a state variable and notify observers.
    /// Transitions never mutate variables themselves.
    pub fn set_state_variable(&self, name: &str, value: ParamValue) {
        self.state_variables
            .write()
            .insert(name.to_string(), value.clone());
        debug!(mode_id = %self.mode_id, name, %value, "state variable set");
        self.notify_observers(&ModeEvent::VariableChanged {
            name: name.to_string(),
            value,
        });
    }

    /// Initial-value variant of `set_state_variable` used while building a
    /// mode from configuration. No observers can be subscribed yet, so no
    /// notification is emitted.
    pub(crate) fn seed_state_variable(&self, name: &str, value: ParamValue) {
        self.state_variables
            .write()
            .insert(name.to_string(), value);
    }

    pub fn get_state_variable(&self, name: &str) -> Option<ParamValue> {
        self.state_variables.read().get(name).cloned()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Every successful transition, in order.
    pub fn transition_history(&self) -> Vec<TransitionRecord> {
        self.history.read().clone()
    }

    pub fn current_state_info(&self) -> ModeStateInfo {
        ModeStateInfo {
            mode_id: self.mode_id.clone(),
            name: self.name.clone(),
            current_state: self.current_state(),
            state_variables: self.state_variables(),
            allowed_commands: self.allowed_commands(),
            required_commands: self.required_commands(),
        }
    }
}
