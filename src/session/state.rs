//! Session readiness state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Readiness of a session's machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    /// No machine has been constructed yet
    #[default]
    Uninitialized,
    /// A machine is being constructed and booted
    Initializing,
    /// The machine booted and accepts commands
    Ready,
    /// Initialization failed; stays failed until destroyed
    Failed,
    /// The machine was torn down; the session can initialize again
    Destroyed,
}

impl ReadyState {
    /// Whether `ensure_ready` would start a fresh initialization
    pub fn can_initialize(self) -> bool {
        matches!(self, ReadyState::Uninitialized | ReadyState::Destroyed)
    }

    pub fn is_ready(self) -> bool {
        self == ReadyState::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReadyState::Uninitialized => "uninitialized",
            ReadyState::Initializing => "initializing",
            ReadyState::Ready => "ready",
            ReadyState::Failed => "failed",
            ReadyState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
