// SPDX-License-Identifier: GPL-3.0-only

//! Component lifecycle state machine.
//!
//! Every component owns exactly one state at a time. Transitions are
//! requested asynchronously through [`Command::SetState`](super::Command) and
//! confirmed by a state-set event from the notification thread.

use std::fmt;

/// Lifecycle state of a hardware component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Terminal fault state; no transition leaves it
    Invalid,
    /// Handle acquired, no resources allocated
    Loaded,
    /// Resources allocated, not processing
    Idle,
    /// Actively exchanging buffers
    Executing,
    /// Processing suspended, resources retained
    Pause,
    /// Blocked waiting for resources before reaching Idle
    WaitForResources,
}

impl LifecycleState {
    /// Whether a transition request from `self` to `target` is legal.
    ///
    /// Legal moves are the adjacent steps of Loaded↔Idle↔Executing↔Pause,
    /// plus WaitForResources (reachable from anywhere, resolving to Loaded or
    /// Idle) and Invalid (reachable from anywhere, terminal). Requesting the
    /// state already held is not legal; the core surfaces it as an error
    /// rather than completing it silently.
    pub fn can_transition_to(self, target: LifecycleState) -> bool {
        use LifecycleState::*;

        if self == Invalid || self == target {
            return false;
        }
        match (self, target) {
            (_, Invalid) | (_, WaitForResources) => true,
            (WaitForResources, Loaded | Idle) => true,
            (Loaded, Idle) | (Idle, Loaded) => true,
            (Idle, Executing) | (Executing, Idle) => true,
            (Executing, Pause) | (Pause, Executing) => true,
            _ => false,
        }
    }

    /// Stable display name, used for logs and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Invalid => "invalid",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Idle => "idle",
            LifecycleState::Executing => "executing",
            LifecycleState::Pause => "pause",
            LifecycleState::WaitForResources => "wait-for-resources",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;

    #[test]
    fn legal_path_transitions() {
        assert!(Loaded.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Loaded));
        assert!(Idle.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Idle));
        assert!(Executing.can_transition_to(Pause));
        assert!(Pause.can_transition_to(Executing));
    }

    #[test]
    fn skipping_states_is_illegal() {
        assert!(!Loaded.can_transition_to(Executing));
        assert!(!Loaded.can_transition_to(Pause));
        assert!(!Executing.can_transition_to(Loaded));
        assert!(!Pause.can_transition_to(Loaded));
    }

    #[test]
    fn same_state_request_is_illegal() {
        for state in [Invalid, Loaded, Idle, Executing, Pause, WaitForResources] {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn wait_for_resources_reachable_from_anywhere() {
        for state in [Loaded, Idle, Executing, Pause] {
            assert!(state.can_transition_to(WaitForResources));
        }
        assert!(WaitForResources.can_transition_to(Idle));
        assert!(WaitForResources.can_transition_to(Loaded));
    }

    #[test]
    fn invalid_is_terminal() {
        for state in [Loaded, Idle, Executing, Pause, WaitForResources] {
            assert!(!Invalid.can_transition_to(state));
            assert!(state.can_transition_to(Invalid));
        }
    }
}
