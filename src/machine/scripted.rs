//! Scripted Machine
//!
//! An in-process stand-in for the emulator that behaves like a tiny shell on
//! a serial console: it echoes input lines, answers them from a script,
//! understands the file commands the materializer generates and prints a
//! prompt after each command. Used to exercise the session deterministically
//! without booting anything.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use base64::Engine as _;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use super::{Machine, MachineConfig, MachineEventSink, MachineFactory};
use crate::error::{Error, Result};

/// Canned response to a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedReply {
    /// Substring the command line must contain
    pub pattern: String,
    /// Output printed before the prompt
    pub output: String,
    /// Print the prompt afterwards; false leaves the command hanging
    pub prompt: bool,
}

impl ScriptedReply {
    pub fn new(pattern: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            output: output.into(),
            prompt: true,
        }
    }

    /// A command that prints `output` and never returns to the prompt
    pub fn hang(pattern: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            prompt: false,
            ..Self::new(pattern, output)
        }
    }
}

/// How a scripted machine comes up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootBehavior {
    /// Print the boot banner ending in the shell prompt
    Prompt,
    /// Report the engine ready event only
    EngineReady,
    /// Report the engine ready event, then print the banner
    Both,
    /// Report an error event
    Fail(String),
    /// Never signal anything
    Silent,
}

#[derive(Debug)]
struct ScriptState {
    replies: Vec<ScriptedReply>,
    boot: BootBehavior,
    boot_delay: Duration,
    banner: String,
    prompt: String,
    file_injection: bool,
    fail_construction: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
    lines: Vec<String>,
    pending_line: String,
    constructions: usize,
    destroys: usize,
    sink: Option<MachineEventSink>,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self {
            replies: Vec::new(),
            boot: BootBehavior::Prompt,
            boot_delay: Duration::from_millis(50),
            banner: "Welcome to Alpine Linux\nlocalhost login: root (automatic login)\n\n".to_string(),
            prompt: "localhost:~# ".to_string(),
            file_injection: true,
            fail_construction: None,
            files: BTreeMap::new(),
            lines: Vec::new(),
            pending_line: String::new(),
            constructions: 0,
            destroys: 0,
            sink: None,
        }
    }
}

fn write_file_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^mkdir -p \$\(dirname (\S+)\) && echo '([A-Za-z0-9+/=]*)' \| base64 -d > (\S+)$").ok()
        })
        .as_ref()
}

fn glob_matches(glob: &str, path: &str) -> bool {
    match glob.split_once('*') {
        Some((prefix, suffix)) => {
            path.len() >= prefix.len() + suffix.len() && path.starts_with(prefix) && path.ends_with(suffix)
        }
        None => glob == path,
    }
}

/// Serial line endings as a terminal would produce them
fn to_crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}

impl ScriptState {
    fn run_line(&mut self, line: &str) -> String {
        self.lines.push(line.to_string());
        let mut out = format!("{}\r\n", line);

        if let Some(reply) = self.replies.iter().find(|r| line.contains(&r.pattern)) {
            out.push_str(&to_crlf(&reply.output));
            if reply.prompt {
                out.push_str(&self.prompt);
            }
            return out;
        }

        out.push_str(&to_crlf(&self.builtin(line)));
        out.push_str(&self.prompt);
        out
    }

    fn builtin(&mut self, line: &str) -> String {
        let trimmed = line.trim();

        if let Some(caps) = write_file_pattern().and_then(|p| p.captures(trimmed)) {
            let path = caps[3].to_string();
            return match B64_STANDARD.decode(&caps[2]) {
                Ok(bytes) => {
                    self.files.insert(path, bytes);
                    String::new()
                }
                Err(_) => "base64: invalid input\n".to_string(),
            };
        }

        if let Some(glob) = trimmed.strip_prefix("rm -fr ") {
            let glob = glob.trim();
            self.files.retain(|path, _| !glob_matches(glob, path));
            return String::new();
        }

        if let Some(path) = trimmed.strip_prefix("cat ") {
            return match self.files.get(path.trim()) {
                Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                None => format!("cat: can't open '{}': No such file or directory\n", path.trim()),
            };
        }

        String::new()
    }

    fn feed(&mut self, data: &[u8]) -> String {
        let mut out = String::new();
        for ch in String::from_utf8_lossy(data).chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.pending_line);
                out.push_str(&self.run_line(&line));
            } else {
                self.pending_line.push(ch);
            }
        }
        out
    }
}

/// Factory producing scripted machines that share one script and filesystem
#[derive(Debug, Clone, Default)]
pub struct ScriptedMachineFactory {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedMachineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a canned reply; earlier replies take precedence
    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.lock().replies.push(reply);
        self
    }

    pub fn with_boot(self, boot: BootBehavior) -> Self {
        self.lock().boot = boot;
        self
    }

    pub fn with_boot_delay(self, delay: Duration) -> Self {
        self.lock().boot_delay = delay;
        self
    }

    pub fn with_prompt(self, prompt: impl Into<String>) -> Self {
        self.lock().prompt = prompt.into();
        self
    }

    /// Behave like a backend with only a serial channel
    pub fn without_file_injection(self) -> Self {
        self.lock().file_injection = false;
        self
    }

    /// Make construction itself fail
    pub fn failing_construction(self, reason: impl Into<String>) -> Self {
        self.lock().fail_construction = Some(reason.into());
        self
    }

    /// Number of machines constructed so far
    pub fn constructions(&self) -> usize {
        self.lock().constructions
    }

    /// Number of machines destroyed so far
    pub fn destroys(&self) -> usize {
        self.lock().destroys
    }

    /// Command lines received, in order
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    /// Contents of a file inside the guest
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Paths of every file inside the guest
    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Place a file in the guest, as if provisioned in the image
    pub fn put_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.into(), contents.into());
    }

    /// Emit raw serial output from the most recent machine
    pub fn inject_output(&self, bytes: &[u8]) -> bool {
        let sink = self.lock().sink.clone();
        sink.map(|sink| sink.output(bytes)).unwrap_or(false)
    }

    /// Report an engine error from the most recent machine
    pub fn inject_error(&self, message: &str) -> bool {
        let sink = self.lock().sink.clone();
        sink.map(|sink| sink.error(message)).unwrap_or(false)
    }
}

#[async_trait]
impl MachineFactory for ScriptedMachineFactory {
    async fn create(&self, _config: &MachineConfig, events: MachineEventSink) -> Result<Box<dyn Machine>> {
        let (boot, delay, banner, prompt) = {
            let mut state = self.lock();
            state.constructions += 1;
            if let Some(reason) = &state.fail_construction {
                return Err(Error::MachineCreationFailed {
                    reason: reason.clone(),
                });
            }
            state.sink = Some(events.clone());
            state.pending_line.clear();
            (
                state.boot.clone(),
                state.boot_delay,
                state.banner.clone(),
                state.prompt.clone(),
            )
        };

        let destroyed = Arc::new(AtomicBool::new(false));
        let boot_events = events.clone();
        let boot_destroyed = Arc::clone(&destroyed);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if boot_destroyed.load(Ordering::SeqCst) {
                return;
            }
            match boot {
                BootBehavior::Prompt => {
                    boot_events.output(to_crlf(&banner).as_bytes());
                    boot_events.output(prompt.as_bytes());
                }
                BootBehavior::EngineReady => {
                    boot_events.ready();
                }
                BootBehavior::Both => {
                    boot_events.ready();
                    boot_events.output(to_crlf(&banner).as_bytes());
                    boot_events.output(prompt.as_bytes());
                }
                BootBehavior::Fail(reason) => {
                    boot_events.error(reason);
                }
                BootBehavior::Silent => {}
            }
        });

        Ok(Box::new(ScriptedMachine {
            state: Arc::clone(&self.state),
            events,
            destroyed,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Machine produced by [`ScriptedMachineFactory`]
pub struct ScriptedMachine {
    state: Arc<Mutex<ScriptState>>,
    events: MachineEventSink,
    destroyed: Arc<AtomicBool>,
}

impl ScriptedMachine {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Machine for ScriptedMachine {
    fn send_serial(&self, data: &[u8]) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        let out = self.lock().feed(data);
        if !out.is_empty() {
            self.events.output(out.as_bytes());
        }
        Ok(())
    }

    async fn create_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.file_injection {
            return Err(Error::FileWriteFailed {
                path: path.to_string(),
                reason: "file injection disabled".to_string(),
            });
        }
        state.files.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    fn supports_file_injection(&self) -> bool {
        self.lock().file_injection
    }

    async fn destroy(&self) -> Result<()> {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.lock().destroys += 1;
        }
        Ok(())
    }
}
