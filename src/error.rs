//! Error types and Result aliases for v86lab

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for v86lab operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for v86lab
#[derive(Debug)]
pub enum Error {
    // === Machine lifecycle errors ===
    /// The machine engine refused to construct an instance
    MachineCreationFailed {
        reason: String,
    },

    /// The machine reported an error event, or initialization was abandoned
    InitializationFailed {
        reason: String,
    },

    /// No readiness signal arrived within the boot window
    BootTimeout {
        duration: Duration,
    },

    /// An operation needed a live machine but none exists
    NotInitialized,

    /// The session exists but has not reached the Ready state
    NotReady {
        state: String,
    },

    /// Writing to the machine's serial input failed
    SerialSendFailed {
        reason: String,
    },

    // === Command errors ===
    /// No completion marker appeared within the timeout window
    CommandTimeout {
        command: String,
        duration: Duration,
    },

    /// Empty command
    EmptyCommand,

    // === File materialization errors ===
    /// File could not be created inside the machine
    FileWriteFailed {
        path: String,
        reason: String,
    },

    /// Target path is not usable in a generated shell command
    InvalidPath {
        path: String,
        reason: String,
    },

    // === Challenge errors ===
    /// Language outside the supported set
    UnsupportedLanguage {
        language: String,
    },

    // === Configuration errors ===
    /// Failed to load configuration file
    ConfigLoadFailed {
        path: PathBuf,
        reason: String,
    },

    /// Configuration file not found
    ConfigNotFound,

    /// Configuration validation failed
    ConfigValidationFailed {
        field: String,
        reason: String,
    },

    /// Failed to serialize configuration
    ConfigSerializationFailed {
        format: String,
        reason: String,
    },

    /// Failed to parse configuration
    ConfigParseFailed {
        format: String,
        reason: String,
    },

    /// Unknown machine profile name
    UnknownProfile {
        name: String,
    },

    // === I/O and serialization errors ===
    /// I/O errors
    Io(std::io::Error),

    /// Serialization errors
    Serde(serde_json::Error),

    /// Regex compilation errors
    Regex(regex::Error),

    /// Generic errors (for cases not yet categorized)
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Machine lifecycle errors
            Error::MachineCreationFailed { reason } => {
                write!(f, "Failed to create machine: {}", reason)
            }
            Error::InitializationFailed { reason } => {
                write!(f, "Emulator initialization failed: {}", reason)
            }
            Error::BootTimeout { duration } => {
                write!(f, "Emulator initialization timeout after {:?}", duration)
            }
            Error::NotInitialized => {
                write!(f, "Emulator not initialized")
            }
            Error::NotReady { state } => {
                write!(f, "Emulator not ready (state: {})", state)
            }
            Error::SerialSendFailed { reason } => {
                write!(f, "Failed to send to serial input: {}", reason)
            }

            // Command errors
            Error::CommandTimeout { command, duration } => {
                write!(f, "Command '{}' timed out after {:?}", command, duration)
            }
            Error::EmptyCommand => {
                write!(f, "Command cannot be empty")
            }

            // File materialization errors
            Error::FileWriteFailed { path, reason } => {
                write!(f, "Failed to write file '{}': {}", path, reason)
            }
            Error::InvalidPath { path, reason } => {
                write!(f, "Invalid path '{}': {}", path, reason)
            }

            // Challenge errors
            Error::UnsupportedLanguage { language } => {
                write!(f, "Unsupported language: {}", language)
            }

            // Configuration errors
            Error::ConfigLoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path.display(), reason)
            }
            Error::ConfigNotFound => {
                write!(f, "Configuration file not found")
            }
            Error::ConfigValidationFailed { field, reason } => {
                write!(f, "Configuration validation failed for '{}': {}", field, reason)
            }
            Error::ConfigSerializationFailed { format, reason } => {
                write!(f, "Failed to serialize config as {}: {}", format, reason)
            }
            Error::ConfigParseFailed { format, reason } => {
                write!(f, "Failed to parse {} config: {}", format, reason)
            }
            Error::UnknownProfile { name } => {
                write!(f, "Unknown machine profile: '{}'", name)
            }

            // I/O and serialization errors
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serde(err) => write!(f, "Serialization error: {}", err),
            Error::Regex(err) => write!(f, "Regex compilation error: {}", err),

            // Generic fallback
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Serde(err) => Some(err),
            Error::Regex(err) => Some(err),
            _ => None,
        }
    }
}

impl Error {
    /// Whether this error came from the machine lifecycle rather than the run itself
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Error::MachineCreationFailed { .. }
                | Error::InitializationFailed { .. }
                | Error::BootTimeout { .. }
                | Error::NotInitialized
                | Error::NotReady { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err)
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Regex(err)
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}
