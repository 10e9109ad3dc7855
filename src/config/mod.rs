//! Configuration management for v86lab
//!
//! One configuration source describes the machine, the session timings, the
//! runner and the editor presentation. Files are TOML or JSON; missing
//! sections fall back to defaults.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use loader::{ConfigFormat, ConfigLoader, LoadOptions};

use crate::editor::EditorOptions;
use crate::error::{Error, Result};
use crate::machine::{MachineConfig, PtyBackendConfig};
use crate::runner::RunnerConfig;
use crate::session::SessionConfig;

/// Main configuration structure for v86lab
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emulated machine
    pub machine: MachineConfig,

    /// Readiness and command timing
    pub session: SessionConfig,

    /// Where code goes and how it is judged
    pub runner: RunnerConfig,

    /// Editor presentation
    pub editor: EditorOptions,

    /// Serial-console process backend
    pub pty: PtyBackendConfig,
}

impl Config {
    /// Load a configuration file, picking the format from its extension
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path);
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        format.parse(&content)
    }

    /// Replace the machine section with a built-in profile
    pub fn with_profile(mut self, name: &str) -> Result<Self> {
        self.machine = MachineConfig::profile(name)?;
        Ok(self)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.machine.validate()?;
        self.session.validate()?;
        self.runner.validate()?;

        if self.editor.font_size == 0 || self.editor.font_size > 72 {
            return Err(Error::ConfigValidationFailed {
                field: "editor.font_size".to_string(),
                reason: "Font size must be between 1 and 72".to_string(),
            });
        }

        if self.pty.command.trim().is_empty() {
            return Err(Error::ConfigValidationFailed {
                field: "pty.command".to_string(),
                reason: "Backend command cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}
