//! Node lifecycle state machine.
//!
//! This module defines the valid state transitions for nodes and provides
//! validation logic to ensure state machine invariants are maintained.
//!
//! # State Machine
//!
//! ```text
//!     ┌───────────┐  reconcile  ┌──────────────┐  provisioned  ┌──────────┐
//!     │  Unknown  │────────────▶│ Initializing │──────────────▶│ Checking │
//!     └───────────┘             └──────────────┘               └────┬─────┘
//!           ▲                          │ (unreachable)    clean      │   stderr
//!           │                          │            ┌────────────────┴───────┐
//!           │◀─────────────────────────┘            ▼                        ▼
//!           │                                 ┌──────────┐             ┌──────────┐
//!           │◀────────────── reset ───────────│  Ready   │             │  Failed  │
//!           │◀────────────── reset ───────────└──────────┘─────────────└──────────┘
//! ```
//!
//! `Initializing` and `Checking` are in-progress states: reconciling a node in
//! either of them does nothing. `Ready` and `Failed` are terminal until an
//! external reset returns the node to `Unknown`.

use chrono::Utc;

use crate::error::{ControlError, Result};
use crate::types::{LifecycleState, NodeRecord};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    name: &str,
    from: LifecycleState,
    to: LifecycleState,
) -> Result<LifecycleState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState {
            name: name.to_string(),
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::{Checking, Failed, Initializing, Ready, Unknown};

    matches!(
        (from, to),
        (Unknown, Initializing)
            | (Initializing, Checking)
            | (Checking, Ready | Failed)
            // Unreachable host rolls back; reset returns terminal nodes
            | (Initializing | Checking | Ready | Failed, Unknown)
    )
}

/// Returns true if a reconcile on a node in this state starts provisioning.
#[must_use]
pub const fn needs_provisioning(state: LifecycleState) -> bool {
    matches!(state, LifecycleState::Unknown)
}

/// Returns true if a batch is running against the node.
#[must_use]
pub const fn is_in_progress(state: LifecycleState) -> bool {
    matches!(
        state,
        LifecycleState::Initializing | LifecycleState::Checking
    )
}

/// Returns true if the node stays put until reset.
#[must_use]
pub const fn is_terminal(state: LifecycleState) -> bool {
    matches!(state, LifecycleState::Ready | LifecycleState::Failed)
}

/// Move `record` from `Unknown` to `Initializing`.
///
/// Returns false, leaving the record untouched, if the node is in any other
/// state. Callers holding the record under a lock use this to make sure only
/// one reconcile provisions a node.
pub fn claim(record: &mut NodeRecord) -> bool {
    if !needs_provisioning(record.status.state) {
        return false;
    }
    record.status.state = LifecycleState::Initializing;
    record.status.updated_at = Some(Utc::now());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use metalnode_core::Host;

    #[test]
    fn valid_transitions() {
        use LifecycleState::*;

        assert!(is_valid_transition(Unknown, Initializing));
        assert!(is_valid_transition(Initializing, Checking));
        assert!(is_valid_transition(Checking, Ready));
        assert!(is_valid_transition(Checking, Failed));
        assert!(is_valid_transition(Initializing, Unknown));
        assert!(is_valid_transition(Failed, Unknown));
    }

    #[test]
    fn invalid_transitions() {
        use LifecycleState::*;

        assert!(!is_valid_transition(Unknown, Checking));
        assert!(!is_valid_transition(Initializing, Ready));
        assert!(!is_valid_transition(Ready, Initializing));
        assert!(!is_valid_transition(Failed, Checking));
        assert!(!is_valid_transition(Unknown, Unknown));
    }

    #[test]
    fn validate_transition_err() {
        let result = validate_transition("node-1", LifecycleState::Ready, LifecycleState::Checking);

        match result {
            Err(ControlError::InvalidState { from, to, .. }) => {
                assert_eq!(from, LifecycleState::Ready);
                assert_eq!(to, LifecycleState::Checking);
            }
            _ => panic!("expected InvalidState error"),
        }
    }

    #[test]
    fn state_classification() {
        assert!(is_in_progress(LifecycleState::Initializing));
        assert!(is_in_progress(LifecycleState::Checking));
        assert!(!is_in_progress(LifecycleState::Unknown));
        assert!(is_terminal(LifecycleState::Ready));
        assert!(is_terminal(LifecycleState::Failed));
        assert!(!is_terminal(LifecycleState::Checking));
    }

    #[test]
    fn claim_only_from_unknown() {
        let mut record = NodeRecord::new("node-1", Host::with_password("root", "10.0.0.5", 22, "pw"));

        assert!(claim(&mut record));
        assert_eq!(record.state(), LifecycleState::Initializing);
        assert!(record.status.updated_at.is_some());

        assert!(!claim(&mut record));
        assert_eq!(record.state(), LifecycleState::Initializing);
    }
}
