//! Session timing and readiness configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Which boot signal marks the machine ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// The engine's ready event
    EngineEvent,
    /// The shell prompt appearing on the serial console
    BootPrompt,
    /// Whichever of the two comes first
    #[default]
    Either,
    /// Both, in any order
    Both,
}

/// Session behaviour settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum time from construction to readiness
    pub boot_timeout_ms: u64,
    /// Default per-command timeout
    pub command_timeout_ms: u64,
    /// A command completes once its transcript contains any of these
    pub completion_markers: Vec<String>,
    /// Serial text that ends the boot sequence
    pub boot_prompt: String,
    pub readiness: ReadinessMode,
    /// Capacity of the session event bus
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boot_timeout_ms: 30_000,
            command_timeout_ms: 10_000,
            completion_markers: vec!["$ ".to_string(), "# ".to_string()],
            boot_prompt: "localhost:~# ".to_string(),
            readiness: ReadinessMode::default(),
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.boot_timeout_ms == 0 {
            return Err(Error::ConfigValidationFailed {
                field: "session.boot_timeout_ms".to_string(),
                reason: "Boot timeout must be greater than 0".to_string(),
            });
        }

        if self.command_timeout_ms == 0 {
            return Err(Error::ConfigValidationFailed {
                field: "session.command_timeout_ms".to_string(),
                reason: "Command timeout must be greater than 0".to_string(),
            });
        }

        if self.completion_markers.is_empty() || self.completion_markers.iter().any(String::is_empty) {
            return Err(Error::ConfigValidationFailed {
                field: "session.completion_markers".to_string(),
                reason: "At least one non-empty completion marker is required".to_string(),
            });
        }

        if self.boot_prompt.is_empty() && self.readiness != ReadinessMode::EngineEvent {
            return Err(Error::ConfigValidationFailed {
                field: "session.boot_prompt".to_string(),
                reason: "Boot prompt cannot be empty unless readiness is engine_event".to_string(),
            });
        }

        Ok(())
    }
}
