//! Connectivity state machine
//!
//! `Uninitialized -> Initializing -> {Connected, Fallback}`,
//! `Connected -> Fallback` on failure or an offline signal,
//! `Fallback -> Initializing` on a re-initialization attempt.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectivityState {
    Uninitialized,
    Initializing,
    Connected,
    Fallback,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Uninitialized => "uninitialized",
            ConnectivityState::Initializing => "initializing",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Fallback => "fallback",
        }
    }

    pub fn can_transition_to(self, next: ConnectivityState) -> bool {
        use ConnectivityState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Uninitialized, Fallback)
                | (Initializing, Connected)
                | (Initializing, Fallback)
                | (Connected, Fallback)
                | (Fallback, Initializing)
        )
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single process-wide state holder; reads are whole-value snapshots
pub struct StateCell {
    state: RwLock<ConnectivityState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectivityState::Uninitialized),
        }
    }

    pub fn get(&self) -> ConnectivityState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`. Returns true if the state changed.
    pub fn transition(&self, next: ConnectivityState) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Ignoring invalid connectivity transition");
            return false;
        }
        *state = next;
        info!(from = %current, to = %next, "Connectivity state changed");
        true
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
