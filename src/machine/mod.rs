//! Machine Engine Abstraction
//!
//! The emulated machine is an external collaborator. This module defines the
//! seam the session drives it through, so the controller can run against a
//! real emulator, a serial-console process, or a scripted fake in tests.

pub mod config;
pub mod pty;
pub mod scripted;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;

pub use config::{FilesystemConfig, MachineConfig, Peripherals};
pub use pty::{PtyBackendConfig, PtyMachine, PtyMachineFactory};
pub use scripted::{BootBehavior, ScriptedMachine, ScriptedMachineFactory, ScriptedReply};

/// Events a machine reports asynchronously
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    /// The engine finished constructing the machine
    Ready,
    /// The engine hit an error
    Error(String),
    /// One byte written by the guest to the serial console
    OutputByte(u8),
}

/// Where a machine delivers its events
///
/// Cloneable; every clone feeds the same session.
#[derive(Clone)]
pub struct MachineEventSink {
    emit: Arc<dyn Fn(MachineEvent) -> bool + Send + Sync>,
}

impl MachineEventSink {
    /// Build a sink from a delivery function
    ///
    /// The function returns false once nobody is listening any more.
    pub fn from_fn<F>(emit: F) -> Self
    where
        F: Fn(MachineEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sink backed by a plain channel, for driving a machine directly
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MachineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::from_fn(move |event| tx.send(event).is_ok()), rx)
    }

    /// Deliver an event; false when the session stopped listening
    pub fn emit(&self, event: MachineEvent) -> bool {
        (self.emit)(event)
    }

    pub fn ready(&self) -> bool {
        self.emit(MachineEvent::Ready)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(MachineEvent::Error(message.into()))
    }

    /// Deliver serial output, one event per byte
    pub fn output(&self, bytes: &[u8]) -> bool {
        bytes
            .iter()
            .all(|&byte| self.emit(MachineEvent::OutputByte(byte)))
    }
}

impl fmt::Debug for MachineEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineEventSink").finish_non_exhaustive()
    }
}

/// A running machine instance
#[async_trait]
pub trait Machine: Send + Sync {
    /// Write bytes to the guest's serial input
    fn send_serial(&self, data: &[u8]) -> Result<()>;

    /// Create a file inside the guest from a byte buffer
    ///
    /// # Errors
    /// Backends without low-level filesystem access return
    /// [`crate::Error::FileWriteFailed`].
    async fn create_file(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Whether [`Machine::create_file`] is available
    fn supports_file_injection(&self) -> bool {
        true
    }

    /// Tear the instance down; must tolerate repeated calls
    async fn destroy(&self) -> Result<()>;
}

/// Constructs machines from a configuration
#[async_trait]
pub trait MachineFactory: Send + Sync {
    /// Construct and start a machine that reports to `events`
    async fn create(&self, config: &MachineConfig, events: MachineEventSink) -> Result<Box<dyn Machine>>;

    /// Short name for logs
    fn name(&self) -> &str {
        "machine"
    }
}
