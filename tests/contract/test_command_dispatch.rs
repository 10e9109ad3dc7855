//! Contract Tests for Command Dispatch
//!
//! One command in flight, a buffer that starts empty for every command, and
//! completion on the first prompt marker or the timeout, whichever is first.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_utils::*;
use tokio::time::Instant;
use v86lab::machine::{BootBehavior, ScriptedReply};
use v86lab::session::Command;
use v86lab::{Error, ReadyState, ScriptedMachineFactory, SessionConfig, SessionEvent};

async fn ready(factory: &ScriptedMachineFactory) -> v86lab::Session {
    let session = session(factory);
    session.ensure_ready().await.unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn test_transcript_holds_echo_output_and_prompt() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::new("echo hi", "hi\n"));
    let session = ready(&factory).await;

    let transcript = session.dispatch("echo hi", None).await.unwrap();

    assert_eq!(transcript, "echo hi\nhi\nlocalhost:~# ");
    assert_eq!(factory.lines(), vec!["echo hi"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_on_time() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::hang("sleep", ""));
    let session = ready(&factory).await;

    let limit = Duration::from_millis(750);
    let started = Instant::now();
    let err = session.dispatch("sleep 100", Some(limit)).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        Error::CommandTimeout { command, duration } => {
            assert_eq!(command, "sleep 100");
            assert_eq!(duration, limit);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(elapsed >= limit);
    assert!(elapsed < limit + Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_comes_from_config() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::hang("sleep", ""));
    let config = SessionConfig {
        command_timeout_ms: 400,
        ..Default::default()
    };
    let session = session_with(&factory, config);
    session.ensure_ready().await.unwrap();

    let err = session.dispatch("sleep 100", None).await.unwrap_err();
    assert!(matches!(err, Error::CommandTimeout { duration, .. } if duration == Duration::from_millis(400)));
}

#[tokio::test(start_paused = true)]
async fn test_stale_output_cannot_complete_a_command() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::new("echo hi", "hi\n"));
    let session = ready(&factory).await;

    assert!(factory.inject_output(b"leftover output $ "));
    let transcript = session.dispatch("echo hi", None).await.unwrap();

    assert_eq!(transcript, "echo hi\nhi\nlocalhost:~# ");
    assert!(!transcript.contains("leftover"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_prompt_does_not_beat_a_hung_command() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::hang("sleep", ""));
    let session = ready(&factory).await;

    assert!(factory.inject_output(b"localhost:~# "));
    let result = session.dispatch("sleep 5", Some(Duration::from_millis(200))).await;

    assert!(matches!(result, Err(Error::CommandTimeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_dispatches_are_serialized() {
    let factory = ScriptedMachineFactory::new()
        .with_reply(ScriptedReply::new("echo one", "one\n"))
        .with_reply(ScriptedReply::new("echo two", "two\n"))
        .with_reply(ScriptedReply::new("echo three", "three\n"));
    let session = ready(&factory).await;

    let (one, two, three) = tokio::join!(
        session.dispatch("echo one", None),
        session.dispatch("echo two", None),
        session.dispatch("echo three", None),
    );

    assert_eq!(one.unwrap(), "echo one\none\nlocalhost:~# ");
    assert_eq!(two.unwrap(), "echo two\ntwo\nlocalhost:~# ");
    assert_eq!(three.unwrap(), "echo three\nthree\nlocalhost:~# ");
    assert_eq!(factory.lines().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_a_timeout() {
    let factory = ScriptedMachineFactory::new()
        .with_reply(ScriptedReply::hang("sleep", "zzz\n"))
        .with_reply(ScriptedReply::new("echo hi", "hi\n"));
    let session = ready(&factory).await;

    assert!(session.dispatch("sleep 9", Some(Duration::from_millis(100))).await.is_err());
    let transcript = session.dispatch("echo hi", None).await.unwrap();

    assert_eq!(transcript, "echo hi\nhi\nlocalhost:~# ");
    assert_eq!(session.state(), ReadyState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_rejections() {
    let factory = ScriptedMachineFactory::new().with_boot(BootBehavior::Silent);
    let session = session(&factory);

    assert!(matches!(session.dispatch("", None).await, Err(Error::EmptyCommand)));
    assert!(matches!(session.dispatch("ls", None).await, Err(Error::NotInitialized)));
    assert!(matches!(session.send_input("ls").await, Err(Error::NotInitialized)));

    let booting = tokio::spawn({
        let session = session.clone();
        async move { session.ensure_ready().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(matches!(
        session.dispatch("ls", None).await,
        Err(Error::NotReady { state }) if state == "initializing"
    ));

    session.destroy().await;
    assert!(booting.await.unwrap().is_err());
    assert!(matches!(session.dispatch("ls", None).await, Err(Error::NotInitialized)));
    assert!(factory.lines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_input_writes_a_line() {
    let factory = ScriptedMachineFactory::new();
    let session = ready(&factory).await;

    session.send_input("export LANG=C").await.unwrap();

    assert_eq!(factory.lines(), vec!["export LANG=C"]);
}

#[tokio::test(start_paused = true)]
async fn test_custom_prompt_and_markers() {
    let factory = ScriptedMachineFactory::new()
        .with_prompt("lab> ")
        .with_reply(ScriptedReply::new("uname", "Linux\n"));
    let config = SessionConfig {
        boot_prompt: "lab> ".to_string(),
        completion_markers: vec!["lab> ".to_string()],
        ..Default::default()
    };
    let session = session_with(&factory, config);
    session.ensure_ready().await.unwrap();

    let transcript = session.dispatch("uname", None).await.unwrap();
    assert_eq!(transcript, "uname\nLinux\nlab> ");
}

#[tokio::test(start_paused = true)]
async fn test_prepared_command() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::new("build", "step 1\nDONE\n"));
    let session = ready(&factory).await;

    let command = Command::new("build", Duration::from_secs(1), vec!["DONE".to_string()]);
    assert!(command.is_complete("...DONE"));
    assert_eq!(command.wire_bytes(), b"build\n");

    let transcript = session.dispatch_command(&command).await.unwrap();
    assert_eq!(transcript, "build\nstep 1\nDONE");
}

#[tokio::test(start_paused = true)]
async fn test_user_triggers() {
    let factory = ScriptedMachineFactory::new();
    let session = ready(&factory).await;

    let repeat = Arc::new(AtomicUsize::new(0));
    let once = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&repeat);
    let o = Arc::clone(&once);
    let repeat_id = session.add_trigger("PING", true, move |_| {
        r.fetch_add(1, Ordering::SeqCst);
    });
    session.add_trigger("PING", false, move |_| {
        o.fetch_add(1, Ordering::SeqCst);
    });

    factory.inject_output(b"PING PING PING");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(repeat.load(Ordering::SeqCst), 3);
    assert_eq!(once.load(Ordering::SeqCst), 1);

    assert!(session.remove_trigger(repeat_id));
    factory.inject_output(b"PING");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(repeat.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_resolves_with_buffer() {
    let factory = ScriptedMachineFactory::new();
    let session = ready(&factory).await;

    let waiter = session.wait_for("login: ");
    factory.inject_output(b"\r\nlocalhost login: ");

    let buffer = waiter.await.unwrap();
    assert!(buffer.ends_with("localhost login: "));
    assert_eq!(session.transcript(), buffer);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_output_is_published() {
    let factory = ScriptedMachineFactory::new().with_reply(ScriptedReply::new("echo hi", "hi\n"));
    let session = ready(&factory).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut events = session.subscribe();

    session.dispatch("echo hi", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut output = String::new();
    while let Some(event) = events.try_recv() {
        if let SessionEvent::Output(text) = event {
            output.push_str(&text);
        }
    }
    assert_eq!(output, "echo hi\nhi\nlocalhost:~# ");
}
