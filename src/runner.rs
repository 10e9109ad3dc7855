//! Lab Runner
//!
//! The single entry point behind "Run Tests": make sure the machine is up,
//! place the learner's code in the guest, run it and judge the output.
//! Every failure along the way ends up in the returned [`TestResult`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::editor::SourceEditor;
use crate::error::{Error, Result};
use crate::language::{FailureDetector, Language};
use crate::materialize::{validate_path, FileMaterializer, FileStrategy, SourceArtifact};
use crate::session::Session;
use crate::transcript::Transcript;
use crate::verdict::{evaluate, ExitIndicator, OutputPredicate, RunOutput, TestResult};

/// How the submitted file gets executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Invoke the language toolchain on the file
    #[default]
    Direct,
    /// Run the image's pre-provisioned test entry script
    EntryScript,
}

/// Runner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Guest directory holding `code.<ext>`
    pub workdir: String,
    pub mode: RunMode,
    /// Script run in [`RunMode::EntryScript`]
    pub entry_script: String,
    /// Remove earlier `code.*` files before writing
    pub clear_before_write: bool,
    pub file_strategy: FileStrategy,
    /// What passing output looks like
    pub expected: OutputPredicate,
    /// Timeout for the run command; the session default when unset
    pub run_timeout_ms: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workdir: "/tmp/code_challenge".to_string(),
            mode: RunMode::Direct,
            entry_script: "/opt/detect-language/run_tests.sh".to_string(),
            clear_before_write: true,
            file_strategy: FileStrategy::Auto,
            expected: OutputPredicate::default(),
            run_timeout_ms: None,
        }
    }
}

impl RunnerConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        validate_path(&self.workdir).map_err(|e| Error::ConfigValidationFailed {
            field: "runner.workdir".to_string(),
            reason: e.to_string(),
        })?;

        if self.mode == RunMode::EntryScript {
            validate_path(&self.entry_script).map_err(|e| Error::ConfigValidationFailed {
                field: "runner.entry_script".to_string(),
                reason: e.to_string(),
            })?;
        }

        if self.run_timeout_ms == Some(0) {
            return Err(Error::ConfigValidationFailed {
                field: "runner.run_timeout_ms".to_string(),
                reason: "Run timeout must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Runs code tests against a session
#[derive(Debug)]
pub struct LabRunner {
    session: Session,
    config: RunnerConfig,
    materializer: FileMaterializer,
    detectors: HashMap<Language, FailureDetector>,
    run_gate: tokio::sync::Mutex<()>,
}

impl LabRunner {
    pub fn new(session: Session, config: RunnerConfig) -> Self {
        let materializer = FileMaterializer::new(session.clone(), config.file_strategy);
        let detectors = Language::ALL
            .iter()
            .map(|&language| (language, FailureDetector::new(language)))
            .collect();

        Self {
            session,
            config,
            materializer,
            detectors,
            run_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run a test for `code` written in `language`
    ///
    /// Never fails: an unsupported language, a machine that will not boot
    /// or a command that times out all come back as a failed result. An
    /// unsupported language is rejected before anything reaches the machine.
    pub async fn run_code_test(&self, code: &str, language: &str) -> TestResult {
        match language.parse::<Language>() {
            Ok(language) => self.run_language_test(code, language).await,
            Err(e) => {
                warn!("Rejecting test: {}", e);
                evaluate(&RunOutput::failure(Some(1), e.to_string()), &self.config.expected)
            }
        }
    }

    /// Run a test for whatever the editor currently holds
    pub async fn run_editor_test(&self, editor: &dyn SourceEditor, language: &str) -> TestResult {
        let code = editor.current_text();
        self.run_code_test(&code, language).await
    }

    /// Run a test for an already parsed language
    pub async fn run_language_test(&self, code: &str, language: Language) -> TestResult {
        let _gate = self.run_gate.lock().await;
        info!("Running {} test ({} bytes of code)", language, code.len());

        if let Err(e) = self.session.ensure_ready().await {
            error!("Machine unavailable: {}", e);
            return TestResult::from_error(&e);
        }

        let output = match self.execute(code, language).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Execution failed: {}", e);
                RunOutput::failure(Some(1), e.to_string())
            }
        };

        let result = evaluate(&output, &self.config.expected);
        info!(passed = result.passed, "Test finished: {}", result.message);
        result
    }

    /// Write the code, run it and collect its output
    pub async fn execute(&self, code: &str, language: Language) -> Result<RunOutput> {
        let artifact = SourceArtifact::new(code, language, self.config.workdir.as_str());
        let source = self
            .materializer
            .write_artifact(&artifact, self.config.clear_before_write)
            .await?;

        let command = match self.config.mode {
            RunMode::Direct => language.run_command(&source, &artifact.binary_path()),
            RunMode::EntryScript => self.config.entry_script.clone(),
        };
        let transcript = Transcript::new(self.session.dispatch(&command, self.config.run_timeout()).await?);

        let session_config = self.session.config();
        let output = transcript.program_output(
            &command,
            Some(session_config.boot_prompt.as_str()),
            &session_config.completion_markers,
        );

        let failure = self
            .detectors
            .get(&language)
            .and_then(|detector| detector.first_failure(&output));
        match failure {
            Some(line) => {
                debug!("Failure marker in output: {}", line);
                Ok(RunOutput {
                    exit: ExitIndicator::Failure { code: None },
                    stderr: output.trim().to_string(),
                    stdout: output,
                })
            }
            None => Ok(RunOutput::success(output)),
        }
    }
}
