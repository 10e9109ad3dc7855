//! Serial-Console Machine Backend
//!
//! Runs any process that exposes a guest's serial console on its terminal
//! (for example `qemu-system-i386 -nographic`) inside a pseudoterminal and
//! presents it as a [`Machine`]. Blocking PTY reads and writes are bridged
//! to the session through background threads.

use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{Machine, MachineConfig, MachineEventSink, MachineFactory};
use crate::error::{Error, Result};

/// How to launch the serial-console process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyBackendConfig {
    /// Program to run
    pub command: String,
    /// Arguments; `{memory_mib}`, `{cdrom}`, `{bios}`, `{cmdline}` and
    /// `{initial_state}` expand from the machine configuration
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Working directory for the process
    pub working_directory: Option<PathBuf>,
    /// Report the machine ready as soon as the process starts
    pub ready_on_spawn: bool,
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtyBackendConfig {
    fn default() -> Self {
        Self {
            command: "qemu-system-i386".to_string(),
            args: vec![
                "-m".to_string(),
                "{memory_mib}".to_string(),
                "-cdrom".to_string(),
                "{cdrom}".to_string(),
                "-nographic".to_string(),
                "-no-reboot".to_string(),
            ],
            env: HashMap::new(),
            working_directory: None,
            ready_on_spawn: false,
            rows: 24,
            cols: 80,
        }
    }
}

impl PtyBackendConfig {
    /// Arguments with machine placeholders substituted
    ///
    /// Placeholders for unset values expand to an empty string.
    pub fn expand_args(&self, machine: &MachineConfig) -> Vec<String> {
        let memory = machine.memory_mib().to_string();
        let substitutions: [(&str, &str); 5] = [
            ("{memory_mib}", memory.as_str()),
            ("{cdrom}", machine.cdrom.as_deref().unwrap_or("")),
            ("{bios}", machine.bios.as_deref().unwrap_or("")),
            ("{cmdline}", machine.cmdline.as_deref().unwrap_or("")),
            ("{initial_state}", machine.initial_state.as_deref().unwrap_or("")),
        ];

        self.args
            .iter()
            .map(|arg| {
                substitutions
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

/// Machine backed by a process on a pseudoterminal
pub struct PtyMachine {
    command: String,
    input_tx: Mutex<Option<Sender<Vec<u8>>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    // Held so the PTY stays open for the lifetime of the machine
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    destroyed: Arc<AtomicBool>,
}

impl PtyMachine {
    /// Spawn the serial-console process
    pub fn spawn(config: &PtyBackendConfig, machine: &MachineConfig, events: MachineEventSink) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::MachineCreationFailed {
                reason: format!("failed to open PTY: {}", e),
            })?;

        let args = config.expand_args(machine);
        let mut cmd_builder = CommandBuilder::new(&config.command);
        cmd_builder.args(&args);
        for (key, value) in &config.env {
            cmd_builder.env(key, value);
        }
        if let Some(dir) = &config.working_directory {
            cmd_builder.cwd(dir);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd_builder)
            .map_err(|e| Error::MachineCreationFailed {
                reason: format!("failed to spawn '{}': {}", config.command, e),
            })?;
        let killer = child.clone_killer();
        info!(
            "Spawned serial console '{} {}' (pid {:?})",
            config.command,
            args.join(" "),
            child.process_id()
        );

        // Closing our copy of the slave lets the reader see EOF when the process exits
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::MachineCreationFailed {
                reason: format!("failed to clone PTY reader: {}", e),
            })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::MachineCreationFailed {
                reason: format!("failed to take PTY writer: {}", e),
            })?;

        let destroyed = Arc::new(AtomicBool::new(false));
        let (input_tx, input_rx) = channel::<Vec<u8>>();

        spawn_reader(reader, events.clone(), Arc::clone(&destroyed));
        spawn_writer(writer, input_rx);

        // Reap the child so it does not linger as a zombie
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!("Serial console exited with code {}", status.exit_code()),
            Err(e) => debug!("Failed to wait for serial console: {}", e),
        });

        if config.ready_on_spawn {
            events.ready();
        }

        Ok(Self {
            command: config.command.clone(),
            input_tx: Mutex::new(Some(input_tx)),
            killer: Mutex::new(Some(killer)),
            master: Mutex::new(Some(pair.master)),
            destroyed,
        })
    }

    /// Program this machine runs
    pub fn command(&self) -> &str {
        &self.command
    }
}

fn spawn_reader(mut reader: Box<dyn Read + Send>, events: MachineEventSink, destroyed: Arc<AtomicBool>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut consecutive_errors = 0;
        const MAX_CONSECUTIVE_ERRORS: u32 = 5;

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("Serial console read EOF");
                    if !destroyed.load(Ordering::SeqCst) {
                        events.error("serial console closed");
                    }
                    break;
                }
                Ok(n) => {
                    consecutive_errors = 0;
                    if !events.output(&buf[..n]) {
                        debug!("Serial console: session stopped listening, stopping reader thread");
                        break;
                    }
                }
                Err(e) => {
                    if e.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }

                    if e.kind() == std::io::ErrorKind::WouldBlock {
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    }

                    if destroyed.load(Ordering::SeqCst) {
                        break;
                    }

                    consecutive_errors += 1;
                    warn!(
                        "Serial console read error ({}): {} (attempt {}/{})",
                        e.kind(),
                        e,
                        consecutive_errors,
                        MAX_CONSECUTIVE_ERRORS
                    );

                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!("Serial console: too many consecutive read errors");
                        events.error(format!("serial console read failed: {}", e));
                        break;
                    }

                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
        debug!("Serial console reader thread exiting");
    });
}

fn spawn_writer(mut writer: Box<dyn Write + Send>, input_rx: std::sync::mpsc::Receiver<Vec<u8>>) {
    thread::spawn(move || {
        while let Ok(data) = input_rx.recv() {
            let mut attempts = 0;
            const MAX_ATTEMPTS: u32 = 3;

            loop {
                match writer.write_all(&data) {
                    Ok(()) => {
                        if let Err(e) = writer.flush() {
                            debug!("Serial console flush error: {}", e);
                        }
                        break;
                    }
                    Err(e) => {
                        attempts += 1;
                        if e.kind() == std::io::ErrorKind::Interrupted {
                            continue;
                        }
                        if e.kind() == std::io::ErrorKind::WouldBlock && attempts < MAX_ATTEMPTS {
                            thread::sleep(Duration::from_millis(10));
                            continue;
                        }
                        warn!("Serial console write error ({}): {}", e.kind(), e);
                        return;
                    }
                }
            }
        }
        debug!("Serial console writer thread exiting");
    });
}

#[async_trait]
impl Machine for PtyMachine {
    fn send_serial(&self, data: &[u8]) -> Result<()> {
        let guard = self.input_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(Error::NotInitialized)?;
        tx.send(data.to_vec()).map_err(|e| Error::SerialSendFailed {
            reason: e.to_string(),
        })
    }

    async fn create_file(&self, path: &str, _contents: &[u8]) -> Result<()> {
        Err(Error::FileWriteFailed {
            path: path.to_string(),
            reason: "serial console backend has no file injection".to_string(),
        })
    }

    fn supports_file_injection(&self) -> bool {
        false
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.input_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let killer = self
            .killer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut killer) = killer {
            if let Err(e) = killer.kill() {
                // Already exited
                debug!("Failed to kill serial console '{}': {}", self.command, e);
            }
        }

        self.master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Factory for [`PtyMachine`]
#[derive(Debug, Clone, Default)]
pub struct PtyMachineFactory {
    config: PtyBackendConfig,
}

impl PtyMachineFactory {
    pub fn new(config: PtyBackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PtyBackendConfig {
        &self.config
    }
}

#[async_trait]
impl MachineFactory for PtyMachineFactory {
    async fn create(&self, config: &MachineConfig, events: MachineEventSink) -> Result<Box<dyn Machine>> {
        let machine = PtyMachine::spawn(&self.config, config, events)?;
        Ok(Box::new(machine))
    }

    fn name(&self) -> &str {
        "pty"
    }
}
