//! Verdict Evaluation
//!
//! Turns a program's output and exit indicator into the pass/fail result
//! shown to the learner.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Greeting the default challenge asks for
pub const DEFAULT_EXPECTED_OUTPUT: &str = "Hello, Epitech Academy!";

/// How the program ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExitIndicator {
    Success,
    Failure { code: Option<i32> },
}

impl ExitIndicator {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitIndicator::Success)
    }
}

impl fmt::Display for ExitIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitIndicator::Success => write!(f, "0"),
            ExitIndicator::Failure { code: Some(code) } => write!(f, "{}", code),
            ExitIndicator::Failure { code: None } => write!(f, "unknown"),
        }
    }
}

/// Observed result of running the learner's program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub exit: ExitIndicator,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit: ExitIndicator::Success,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            exit: ExitIndicator::Failure { code },
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// What correct output looks like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "expected", rename_all = "snake_case")]
pub enum OutputPredicate {
    /// Every string appears in the output
    ContainsAll(Vec<String>),
    /// Every string appears in the output, ignoring case
    ContainsAllIgnoreCase(Vec<String>),
    /// Output equals the string after trimming both
    Exact(String),
}

impl Default for OutputPredicate {
    fn default() -> Self {
        OutputPredicate::ContainsAll(vec![DEFAULT_EXPECTED_OUTPUT.to_string()])
    }
}

impl OutputPredicate {
    pub fn holds(&self, output: &str) -> bool {
        match self {
            OutputPredicate::ContainsAll(expected) => expected.iter().all(|e| output.contains(e.as_str())),
            OutputPredicate::ContainsAllIgnoreCase(expected) => {
                let output = output.to_lowercase();
                expected.iter().all(|e| output.contains(&e.to_lowercase()))
            }
            OutputPredicate::Exact(expected) => output.trim() == expected.trim(),
        }
    }
}

/// Outcome of a test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<String>,
}

impl TestResult {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: "All tests passed!".to_string(),
            details: Some(details.into()),
        }
    }

    pub fn fail(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Failure caused by the harness rather than the learner's code
    pub fn from_error(error: &crate::error::Error) -> Self {
        Self::fail("Test execution failed", error.to_string())
    }
}

/// Judge a run against a predicate
pub fn evaluate(output: &RunOutput, predicate: &OutputPredicate) -> TestResult {
    match output.exit {
        ExitIndicator::Success if predicate.holds(&output.stdout) => {
            TestResult::pass(format!("Code executed successfully. Output: {}", output.stdout))
        }
        ExitIndicator::Success => TestResult::fail(
            "Tests failed",
            format!(
                "Code executed but output doesn't match expected result. Output: {}",
                output.stdout
            ),
        ),
        ExitIndicator::Failure { .. } => TestResult::fail(
            "Tests failed",
            format!(
                "Execution failed with exit code {}. Error: {}",
                output.exit, output.stderr
            ),
        ),
    }
}
