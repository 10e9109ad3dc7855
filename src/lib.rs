//! v86lab - run coding-challenge submissions inside an emulated machine
//!
//! This library drives an emulated x86 machine over its serial console: it
//! boots the machine once, places the learner's code in the guest, runs it
//! through the guest shell and turns the output into a pass/fail verdict.
//!
//! ## Module Organization
//!
//! ### Machine Control
//!
//! - [`machine`] - Engine seam (`Machine`, `MachineFactory`), configuration
//!   profiles, the PTY serial-console backend and a scripted backend
//! - [`serial`] - Byte demuxer and suffix-matching triggers
//! - [`session`] - Readiness lifecycle, output pump and command dispatch
//!
//! ### Challenge Flow
//!
//! - [`materialize`] - Writing source files into the guest
//! - [`runner`] - The "Run Tests" entry point
//! - [`verdict`] - Output predicates and test results
//! - [`language`] - Supported languages and their toolchains
//! - [`transcript`] - Peeling echo and prompt off command transcripts
//! - [`editor`] - Source editor seam and presentation options
//!
//! ### Support
//!
//! - [`config`] - Configuration loading and validation
//! - [`mod@error`] - Error types and Result aliases
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use v86lab::{Config, LabRunner, PtyMachineFactory, Session};
//!
//! # async fn run() -> v86lab::Result<()> {
//! let config = Config::default();
//! let factory = Arc::new(PtyMachineFactory::new(config.pty.clone()));
//! let session = Session::from_config(factory, &config);
//! let runner = LabRunner::new(session.clone(), config.runner.clone());
//!
//! let result = runner
//!     .run_code_test("print(\"Hello, Epitech Academy!\")", "python")
//!     .await;
//! println!("{}: {:?}", result.message, result.details);
//!
//! session.destroy().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Machine Threads:** Backends bridge blocking I/O to async through
//!   background threads and report one event per serial byte
//! - **Pump Task:** One tokio task per machine drains those events in order
//! - **Command Gate:** One command in flight per session; others queue
//!
//! Completion of a command is detected heuristically: the transcript is done
//! once it contains a shell prompt marker (`"$ "` or `"# "` by default).

#![allow(unexpected_cfgs)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod editor;
pub mod error;
pub mod language;
pub mod machine;
pub mod materialize;
pub mod runner;
pub mod serial;
pub mod session;
pub mod transcript;
pub mod verdict;

// Re-exports for core functionality
pub use config::{Config, ConfigLoader, LoadOptions};
pub use error::{Error, Result};
pub use language::Language;
pub use machine::{Machine, MachineConfig, MachineEvent, MachineEventSink, MachineFactory};
pub use machine::{PtyMachineFactory, ScriptedMachineFactory};
pub use materialize::{FileMaterializer, FileStrategy, SourceArtifact};
pub use runner::{LabRunner, RunMode, RunnerConfig};
pub use session::{ReadyState, Session, SessionConfig, SessionEvent};
pub use verdict::{OutputPredicate, TestResult};

/// The current version of v86lab from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The application name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// The application description from Cargo.toml
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Load configuration for a run
///
/// Uses `config_path` when given, the search paths otherwise. A `profile`
/// replaces the machine section with a built-in machine profile. The result
/// is validated.
///
/// # Errors
///
/// This function will return an error if:
/// - The explicit configuration file cannot be read or parsed
/// - The profile name is unknown
/// - The final configuration fails validation
pub fn load_config(config_path: Option<&std::path::Path>, profile: Option<&str>) -> Result<Config> {
    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Config::load_from_file(path)?
        }
        None => match ConfigLoader::load_with_options(LoadOptions {
            create_default: true,
            validate: false,
        }) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load configuration: {}. Using defaults", e);
                Config::default()
            }
        },
    };

    let config = match profile {
        Some(name) => {
            debug!("Applying machine profile '{}'", name);
            config.with_profile(name)?
        }
        None => config,
    };

    config.validate()?;
    Ok(config)
}

/// User-facing explanation for an error that stops the program
pub fn handle_startup_error(error: &Error) -> String {
    match error {
        Error::ConfigLoadFailed { path, reason } => {
            format!(
                "Configuration Error: Failed to load config from '{}': {}\n\nTry:\n• Check the file path\n• Ensure file permissions are correct",
                path.display(),
                reason
            )
        }
        Error::ConfigParseFailed { format, reason } => {
            format!(
                "Configuration Error: Failed to parse {} config: {}\n\nTry:\n• Check configuration file syntax\n• Ensure file is valid {}",
                format, reason, format
            )
        }
        Error::ConfigValidationFailed { field, reason } => {
            format!(
                "Configuration Error: Validation failed for '{}': {}\n\nTry:\n• Check configuration value\n• Remove the field to use its default",
                field, reason
            )
        }
        Error::UnknownProfile { name } => {
            format!(
                "Configuration Error: Unknown machine profile '{}'\n\nAvailable profiles: alpine, minimal",
                name
            )
        }
        Error::UnsupportedLanguage { language } => {
            format!(
                "Unsupported language: {}\n\nSupported languages: python, c, lua",
                language
            )
        }
        Error::Io(err) => {
            format!(
                "I/O Error: {}\n\nTry:\n• Check file permissions\n• Ensure the source file exists",
                err
            )
        }
        _ => {
            format!(
                "Unexpected Error: {}\n\nPlease report this issue with debug logs enabled",
                error
            )
        }
    }
}
