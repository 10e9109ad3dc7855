//! Integration Tests for Run Flows
//!
//! Full "Run Tests" flows against a scripted guest: boot, write the code,
//! run it and judge the output.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use test_utils::*;
use v86lab::editor::StaticSource;
use v86lab::machine::{BootBehavior, ScriptedReply};
use v86lab::{FileStrategy, OutputPredicate, ReadyState, RunMode, RunnerConfig, ScriptedMachineFactory, SessionConfig};

#[tokio::test(start_paused = true)]
async fn test_python_submission_passes() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(greeting_reply(PYTHON_RUN)));

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(result.passed, "{:?}", result);
    assert_eq!(result.message, "All tests passed!");
    assert!(result.details.unwrap().contains(GREETING));
    assert_eq!(
        lab.factory.file("/tmp/code_challenge/code.py").unwrap(),
        PYTHON_HELLO.as_bytes()
    );
    assert_eq!(lab.session.state(), ReadyState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_c_submission_compiles_and_runs() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(greeting_reply(C_RUN)));

    let result = lab.runner.run_code_test(C_HELLO, "c").await;

    assert!(result.passed, "{:?}", result);
    assert!(lab.factory.lines().iter().any(|line| line == C_RUN));
    assert_eq!(lab.factory.file("/tmp/code_challenge/code.c").unwrap(), C_HELLO.as_bytes());
}

#[tokio::test(start_paused = true)]
async fn test_lua_submission_passes() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(greeting_reply(LUA_RUN)));

    let result = lab.runner.run_code_test(LUA_HELLO, "lua").await;

    assert!(result.passed, "{:?}", result);
    assert!(lab.factory.lines().iter().any(|line| line == LUA_RUN));
}

#[tokio::test(start_paused = true)]
async fn test_wrong_output_fails_with_actual_output() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(ScriptedReply::new(PYTHON_RUN, "Hello there\n")));

    let result = lab.runner.run_code_test(PYTHON_WRONG, "python").await;

    assert!(!result.passed);
    assert_eq!(result.message, "Tests failed");
    let details = result.details.unwrap();
    assert!(details.contains("doesn't match expected result"));
    assert!(details.contains("Hello there"));
}

#[tokio::test(start_paused = true)]
async fn test_traceback_is_an_execution_failure() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(ScriptedReply::new(PYTHON_RUN, PYTHON_TRACEBACK)));

    let result = lab.runner.run_code_test(PYTHON_BROKEN, "python").await;

    assert!(!result.passed);
    assert_eq!(result.message, "Tests failed");
    let details = result.details.unwrap();
    assert!(details.starts_with("Execution failed with exit code unknown"));
    assert!(details.contains("NameError: name 'greeting' is not defined"));
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_language_never_touches_the_machine() {
    let lab = lab(ScriptedMachineFactory::new());

    let result = lab.runner.run_code_test("fn main() {}", "rust").await;

    assert!(!result.passed);
    assert_eq!(result.message, "Tests failed");
    assert!(result.details.unwrap().contains("Unsupported language: rust"));
    assert_eq!(lab.factory.constructions(), 0);
    assert!(lab.factory.lines().is_empty());
    assert_eq!(lab.session.state(), ReadyState::Uninitialized);
}

#[tokio::test(start_paused = true)]
async fn test_serial_only_backend_writes_through_the_shell() {
    let factory = ScriptedMachineFactory::new()
        .without_file_injection()
        .with_reply(greeting_reply(PYTHON_RUN));
    let lab = lab(factory);

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(result.passed, "{:?}", result);
    assert_eq!(
        lab.factory.file("/tmp/code_challenge/code.py").unwrap(),
        PYTHON_HELLO.as_bytes()
    );
    assert!(lab
        .factory
        .lines()
        .iter()
        .any(|line| line.starts_with("mkdir -p $(dirname /tmp/code_challenge/code.py)")));
}

#[tokio::test(start_paused = true)]
async fn test_forced_shell_strategy_with_injection_available() {
    let runner_config = RunnerConfig {
        file_strategy: FileStrategy::Shell,
        ..Default::default()
    };
    let lab = lab_with(
        ScriptedMachineFactory::new().with_reply(greeting_reply(LUA_RUN)),
        SessionConfig::default(),
        runner_config,
    );

    let result = lab.runner.run_code_test(LUA_HELLO, "lua").await;

    assert!(result.passed, "{:?}", result);
    assert!(lab.factory.lines().iter().any(|line| line.contains("base64 -d")));
}

#[tokio::test(start_paused = true)]
async fn test_entry_script_mode_runs_the_image_script() {
    let runner_config = RunnerConfig {
        mode: RunMode::EntryScript,
        ..Default::default()
    };
    let lab = lab_with(
        ScriptedMachineFactory::new().with_reply(greeting_reply(ENTRY_SCRIPT)),
        SessionConfig::default(),
        runner_config,
    );

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(result.passed, "{:?}", result);
    let lines = lab.factory.lines();
    assert!(lines.iter().any(|line| line == ENTRY_SCRIPT));
    assert!(!lines.iter().any(|line| line.starts_with("python3")));
    assert!(lab.factory.file("/tmp/code_challenge/code.py").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stale_artifacts_are_cleared() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(greeting_reply(PYTHON_RUN)));
    lab.factory.put_file("/tmp/code_challenge/code.c", C_HELLO);
    lab.factory.put_file("/tmp/code_challenge/notes.txt", "keep me");

    let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(result.passed, "{:?}", result);
    assert!(lab.factory.file("/tmp/code_challenge/code.c").is_none());
    assert!(lab.factory.file("/tmp/code_challenge/notes.txt").is_some());
    assert_eq!(
        lab.factory.file_paths(),
        vec!["/tmp/code_challenge/code.py", "/tmp/code_challenge/notes.txt"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_clear_can_be_disabled() {
    let runner_config = RunnerConfig {
        clear_before_write: false,
        ..Default::default()
    };
    let lab = lab_with(
        ScriptedMachineFactory::new().with_reply(greeting_reply(PYTHON_RUN)),
        SessionConfig::default(),
        runner_config,
    );
    lab.factory.put_file("/tmp/code_challenge/code.c", C_HELLO);

    lab.runner.run_code_test(PYTHON_HELLO, "python").await;

    assert!(lab.factory.file("/tmp/code_challenge/code.c").is_some());
    assert!(!lab.factory.lines().iter().any(|line| line.starts_with("rm -fr")));
}

#[tokio::test(start_paused = true)]
async fn test_editor_contents_are_submitted() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(greeting_reply(PYTHON_RUN)));
    let editor = StaticSource::new(PYTHON_HELLO);

    let result = lab.runner.run_editor_test(&editor, "python").await;

    assert!(result.passed, "{:?}", result);
    assert_eq!(
        lab.factory.file("/tmp/code_challenge/code.py").unwrap(),
        PYTHON_HELLO.as_bytes()
    );
}

#[tokio::test(start_paused = true)]
async fn test_runs_share_one_machine() {
    let factory = ScriptedMachineFactory::new()
        .with_reply(greeting_reply(PYTHON_RUN))
        .with_reply(greeting_reply(LUA_RUN));
    let lab = lab(factory);

    for _ in 0..3 {
        let result = lab.runner.run_code_test(PYTHON_HELLO, "python").await;
        assert!(result.passed, "{:?}", result);
    }
    let result = lab.runner.run_code_test(LUA_HELLO, "lua").await;
    assert!(result.passed, "{:?}", result);

    assert_eq!(lab.factory.constructions(), 1);
    assert!(lab.factory.file("/tmp/code_challenge/code.py").is_none());
    assert!(lab.factory.file("/tmp/code_challenge/code.lua").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_are_serialized() {
    let lab = lab(ScriptedMachineFactory::new()
        .with_reply(greeting_reply(PYTHON_RUN))
        .with_reply(greeting_reply(LUA_RUN)));

    let (python, lua) = tokio::join!(
        lab.runner.run_code_test(PYTHON_HELLO, "python"),
        lab.runner.run_code_test(LUA_HELLO, "lua"),
    );

    assert!(python.passed, "{:?}", python);
    assert!(lua.passed, "{:?}", lua);
    assert_eq!(lab.factory.constructions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_expected_output() {
    let runner_config = RunnerConfig {
        expected: OutputPredicate::Exact("42".to_string()),
        ..Default::default()
    };
    let lab = lab_with(
        ScriptedMachineFactory::new().with_reply(ScriptedReply::new(PYTHON_RUN, "42\n")),
        SessionConfig::default(),
        runner_config,
    );

    let result = lab.runner.run_code_test("print(6 * 7)\n", "python").await;

    assert!(result.passed, "{:?}", result);
}

#[tokio::test(start_paused = true)]
async fn test_language_aliases_are_accepted() {
    let lab = lab(ScriptedMachineFactory::new().with_reply(greeting_reply(PYTHON_RUN)));

    let result = lab.runner.run_code_test(PYTHON_HELLO, " Python3 ").await;

    assert!(result.passed, "{:?}", result);
}

#[tokio::test(start_paused = true)]
async fn test_unterminated_output_before_unfamiliar_prompt() {
    let factory = ScriptedMachineFactory::new()
        .with_boot(BootBehavior::EngineReady)
        .with_prompt("~ # ")
        .with_reply(ScriptedReply::new(PYTHON_RUN, GREETING));
    let lab = lab(factory);

    let result = lab
        .runner
        .run_code_test("import sys; sys.stdout.write('Hello, Epitech Academy!')", "python")
        .await;

    assert!(result.passed, "{:?}", result);
    assert!(result.details.unwrap().contains(GREETING));
}

#[tokio::test(start_paused = true)]
async fn test_unterminated_output_before_directory_prompt() {
    let factory = ScriptedMachineFactory::new()
        .with_boot(BootBehavior::EngineReady)
        .with_prompt("/tmp/code_challenge $ ")
        .with_reply(ScriptedReply::new(C_RUN, GREETING));
    let lab = lab(factory);

    let result = lab
        .runner
        .run_code_test("#include <stdio.h>\nint main() { printf(\"Hello, Epitech Academy!\"); }\n", "c")
        .await;

    assert!(result.passed, "{:?}", result);
}
