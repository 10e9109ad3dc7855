//! File Materializer
//!
//! Places source text inside the guest filesystem, either through the
//! machine's own file primitive or by piping base64 through the guest shell.

use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::language::Language;
use crate::session::Session;

/// Characters a generated shell command cannot carry unquoted
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '<', '>', '`', '$', '\'', '"', '\\', '(', ')', '{', '}', '*', '?', '[', ']', '!', '#', '~',
];

/// Transcript fragments meaning the shell write did not land
const WRITE_FAILURE_MARKERS: &[&str] = &["base64: ", "can't create", "Permission denied", "No space left"];

/// How files reach the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStrategy {
    /// The machine's file primitive
    Direct,
    /// A base64 pipe dispatched through the guest shell
    Shell,
    /// Direct when the machine supports it, shell otherwise
    #[default]
    Auto,
}

/// Check that a path is absolute and safe to splice into a shell command
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("path must be absolute"));
    }
    if path.len() == 1 || path.ends_with('/') {
        return Err(invalid("path must name a file"));
    }
    if path.chars().any(char::is_whitespace) {
        return Err(invalid("path must not contain whitespace"));
    }
    if let Some(c) = path.chars().find(|c| SHELL_METACHARACTERS.contains(c) || c.is_control()) {
        return Err(invalid(&format!("path must not contain '{}'", c.escape_default())));
    }
    Ok(())
}

/// Shell command that writes `text` to `path`, creating parent directories
pub fn shell_write_command(path: &str, text: &str) -> Result<String> {
    validate_path(path)?;
    Ok(format!(
        "mkdir -p $(dirname {path}) && echo '{}' | base64 -d > {path}",
        B64_STANDARD.encode(text.as_bytes()),
    ))
}

/// Shell command removing every `<stem>.*` file in `dir`
pub fn clear_command(dir: &str, stem: &str) -> Result<String> {
    validate_path(dir)?;
    validate_path(&format!("{}/{}", dir, stem))?;
    Ok(format!("rm -fr {}/{}.*", dir.trim_end_matches('/'), stem))
}

/// Source code bound to its place in the guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArtifact {
    pub code: String,
    pub language: Language,
    /// Directory holding the artifact
    pub workdir: String,
    /// File name without extension
    pub stem: String,
}

impl SourceArtifact {
    pub fn new(code: impl Into<String>, language: Language, workdir: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language,
            workdir: workdir.into(),
            stem: "code".to_string(),
        }
    }

    /// Absolute path of the source file, `<workdir>/<stem>.<ext>`
    pub fn path(&self) -> String {
        format!(
            "{}/{}.{}",
            self.workdir.trim_end_matches('/'),
            self.stem,
            self.language.extension()
        )
    }

    /// Path for a compiled binary next to the source
    pub fn binary_path(&self) -> String {
        format!("{}/{}", self.workdir.trim_end_matches('/'), self.stem)
    }
}

/// Writes files into a session's machine
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    session: Session,
    strategy: FileStrategy,
    timeout: Option<Duration>,
}

impl FileMaterializer {
    pub fn new(session: Session, strategy: FileStrategy) -> Self {
        Self {
            session,
            strategy,
            timeout: None,
        }
    }

    /// Timeout for shell writes; the session default otherwise
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn strategy(&self) -> FileStrategy {
        self.strategy
    }

    /// Strategy that would be used right now
    ///
    /// # Errors
    /// [`Error::FileWriteFailed`] when `Auto` has no machine to ask.
    pub fn effective_strategy(&self, path: &str) -> Result<FileStrategy> {
        match self.strategy {
            FileStrategy::Auto => match self.session.supports_file_injection() {
                Some(true) => Ok(FileStrategy::Direct),
                Some(false) => Ok(FileStrategy::Shell),
                None => Err(no_machine(path)),
            },
            strategy => Ok(strategy),
        }
    }

    /// Write `text` to `path` inside the guest
    pub async fn write(&self, path: &str, text: &str) -> Result<()> {
        validate_path(path)?;
        match self.effective_strategy(path)? {
            FileStrategy::Shell => {
                let command = shell_write_command(path, text)?;
                debug!("Writing {} ({} bytes) through the shell", path, text.len());
                let transcript = self.run(path, &command).await?;
                if let Some(marker) = WRITE_FAILURE_MARKERS.iter().find(|m| transcript.contains(*m)) {
                    warn!("Shell write of {} reported '{}'", path, marker.trim());
                    return Err(Error::FileWriteFailed {
                        path: path.to_string(),
                        reason: transcript.trim().to_string(),
                    });
                }
                Ok(())
            }
            _ => {
                debug!("Writing {} ({} bytes) directly", path, text.len());
                self.session.create_file(path, text.as_bytes()).await
            }
        }
    }

    /// Remove `<dir>/<stem>.*` inside the guest
    pub async fn clear(&self, dir: &str, stem: &str) -> Result<()> {
        let command = clear_command(dir, stem)?;
        self.run(dir, &command).await.map(|_| ())
    }

    /// Write a source artifact, optionally clearing stale artifacts first
    pub async fn write_artifact(&self, artifact: &SourceArtifact, clear_first: bool) -> Result<String> {
        let path = artifact.path();
        if clear_first {
            self.clear(&artifact.workdir, &artifact.stem).await?;
        }
        self.write(&path, &artifact.code).await?;
        Ok(path)
    }

    async fn run(&self, path: &str, command: &str) -> Result<String> {
        match self.session.dispatch(command, self.timeout).await {
            Err(Error::NotInitialized) => Err(no_machine(path)),
            other => other,
        }
    }
}

fn no_machine(path: &str) -> Error {
    Error::FileWriteFailed {
        path: path.to_string(),
        reason: "no machine is running".to_string(),
    }
}
