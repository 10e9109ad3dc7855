//! Integration Tests for Error Handling
//!
//! Boot failures, hung programs, engine errors and failed writes all have
//! to come back as a verdict or a typed error, never as a hang.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::time::Duration;
use test_utils::*;
use tokio::time::Instant;
use v86lab::machine::{BootBehavior, ScriptedReply};
use v86lab::{Error, FileMaterializer, FileStrategy, ReadyState, RunnerConfig, ScriptedMachineFactory, SessionConfig};

#[tokio::test(start_paused = true)]
async fn test_boot_error_becomes_execution_failure() {
    let lab = lab(ScriptedMachineFactory::new().with_boot(BootBehavior::Fail("kernel panic".to_string())));

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(!result.passed);
    assert_eq!(result.message, "Test execution failed");
    assert_eq!(
        result.details.as_deref(),
        Some("Emulator initialization failed: kernel panic")
    );
    assert_eq!(lab.session.state(), ReadyState::Failed);
    assert_eq!(lab.factory.destroys(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_boot_timeout() {
    let session_config = SessionConfig {
        boot_timeout_ms: 2_000,
        ..Default::default()
    };
    let lab = lab_with(
        ScriptedMachineFactory::new().with_boot(BootBehavior::Silent),
        session_config,
        RunnerConfig::default(),
    );

    let started = Instant::now();
    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(!result.passed);
    assert_eq!(result.message, "Test execution failed");
    assert!(result.details.unwrap().contains("timeout after 2s"));
    assert!(matches!(
        lab.session.last_failure(),
        Some(Error::BootTimeout { duration }) if duration == Duration::from_secs(2)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_machine_construction_failure() {
    let lab = lab(ScriptedMachineFactory::new().failing_construction("wasm module missing"));

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(!result.passed);
    assert_eq!(result.message, "Test execution failed");
    assert!(result.details.unwrap().contains("wasm module missing"));
    assert_eq!(lab.factory.constructions(), 1);
    assert_eq!(lab.session.state(), ReadyState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_hung_program_times_out() {
    let session_config = SessionConfig {
        command_timeout_ms: 1_000,
        ..Default::default()
    };
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::hang(PYTHON_RUN, "waiting forever\n"));
    let lab = lab_with(factory, session_config, RunnerConfig::default());

    let result = lab.runner.run_code_test("while True: pass\n", "python").await;

    assert!(!result.passed);
    assert_eq!(result.message, "Tests failed");
    let details = result.details.unwrap();
    assert!(details.contains("exit code 1"));
    assert!(details.contains("timed out after 1s"));
    assert_eq!(lab.session.state(), ReadyState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_overrides_command_timeout() {
    let runner_config = RunnerConfig {
        run_timeout_ms: Some(250),
        ..Default::default()
    };
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::hang(PYTHON_RUN, ""));
    let lab = lab_with(factory, SessionConfig::default(), runner_config);

    lab.session.ensure_ready().await.unwrap();
    let started = Instant::now();
    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(result.details.unwrap().contains("timed out after 250ms"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_sticky_until_destroy() {
    let factory = ScriptedMachineFactory::new().with_boot(BootBehavior::Fail("no disk".to_string()));
    let lab = lab(factory);

    let first = lab.session.ensure_ready().await.unwrap_err();
    let second = lab.session.ensure_ready().await.unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(lab.factory.constructions(), 1);

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;
    assert_eq!(result.message, "Test execution failed");
    assert_eq!(lab.factory.constructions(), 1);

    let factory = lab.factory.clone().with_boot(BootBehavior::Prompt).with_reply(greeting_reply(PYTHON_RUN));
    lab.session.destroy().await;
    assert_eq!(lab.session.state(), ReadyState::Destroyed);

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;
    assert!(result.passed, "{:?}", result);
    assert_eq!(factory.constructions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_engine_error_after_boot_fails_the_session() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(greeting_reply(PYTHON_RUN)));
    lab.session.ensure_ready().await.unwrap();
    let mut events = lab.session.subscribe();

    assert!(lab.factory.inject_error("emulator crashed"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(lab.session.state(), ReadyState::Failed);
    assert!(matches!(
        lab.session.dispatch("ls", None).await,
        Err(Error::NotReady { state }) if state == "failed"
    ));

    let mut saw_error = false;
    while let Some(event) = events.try_recv() {
        if let v86lab::SessionEvent::Error(message) = event {
            saw_error |= message.contains("emulator crashed");
        }
    }
    assert!(saw_error);

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;
    assert_eq!(result.message, "Test execution failed");
    assert!(result.details.unwrap().contains("emulator crashed"));
}

#[tokio::test(start_paused = true)]
async fn test_shell_write_failure_is_reported() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::new(
        "base64 -d",
        "sh: can't create /tmp/code_challenge/code.py: Permission denied\n",
    ));
    let session = session(&factory);
    session.ensure_ready().await.unwrap();

    let materializer = FileMaterializer::new(session.clone(), FileStrategy::Shell);
    let err = materializer
        .write("/tmp/code_challenge/code.py", PYTHON_HELLO)
        .await
        .unwrap_err();

    match err {
        Error::FileWriteFailed { path, reason } => {
            assert_eq!(path, "/tmp/code_challenge/code.py");
            assert!(reason.contains("Permission denied"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(factory.file("/tmp/code_challenge/code.py").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_fails_the_run() {
    let factory = ScriptedMachineFactory::new()
        .without_file_injection()
        .with_reply(ScriptedReply::new("base64 -d", "sh: can't create /tmp/code_challenge/code.py: No space left on device\n"))
        .with_reply(greeting_reply(PYTHON_RUN));
    let lab = lab(factory);

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(!result.passed);
    assert_eq!(result.message, "Tests failed");
    assert!(result.details.unwrap().contains("No space left"));
    assert!(!lab.factory.lines().iter().any(|line| line == PYTHON_RUN));
}

#[tokio::test(start_paused = true)]
async fn test_write_without_machine() {
    let factory = ScriptedMachineFactory::new();
    let session = session(&factory);

    for strategy in [FileStrategy::Auto, FileStrategy::Direct, FileStrategy::Shell] {
        let materializer = FileMaterializer::new(session.clone(), strategy);
        assert!(matches!(
            materializer.write("/tmp/code_challenge/code.py", "x").await,
            Err(Error::FileWriteFailed { .. })
        ));
    }
    assert_eq!(factory.constructions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsafe_paths_are_rejected_before_dispatch() {
    let factory = ScriptedMachineFactory::new();
    let session = session(&factory);
    session.ensure_ready().await.unwrap();

    let materializer = FileMaterializer::new(session, FileStrategy::Shell);
    for path in ["relative/code.py", "/tmp/a b.py", "/tmp/$(reboot)", "/tmp/x;rm"] {
        assert!(matches!(
            materializer.write(path, "x").await,
            Err(Error::InvalidPath { .. })
        ));
    }
    assert!(factory.lines().is_empty());
}
