//! Command Dispatcher
//!
//! Sends one command at a time to the guest shell and collects its
//! transcript. The buffer clear and the completion waiter travel through
//! the pump queue, so nothing the machine printed before the clear can leak
//! into the new command's transcript.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pump::PumpMessage;
use super::Session;
use crate::error::{Error, Result};

/// A command line sent to the guest shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: Uuid,
    pub text: String,
    pub issued_at: DateTime<Utc>,
    /// How long to wait for a completion marker
    pub timeout: Duration,
    /// The transcript is complete once it contains any of these
    pub markers: Vec<String>,
}

impl Command {
    pub fn new(text: impl Into<String>, timeout: Duration, markers: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            issued_at: Utc::now(),
            timeout,
            markers,
        }
    }

    /// Whether a transcript contains one of this command's markers anywhere.
    ///
    /// Dispatch does not call this: the pump completes a command through
    /// suffix waiters on the same markers. This is for callers that already
    /// hold a full transcript.
    pub fn is_complete(&self, transcript: &str) -> bool {
        self.markers
            .iter()
            .any(|marker| !marker.is_empty() && transcript.contains(marker.as_str()))
    }

    /// Bytes written to the serial input
    pub fn wire_bytes(&self) -> Vec<u8> {
        format!("{}\n", self.text).into_bytes()
    }
}

impl Session {
    /// Run a shell command and return its transcript
    ///
    /// The transcript holds everything the guest printed from the clear up
    /// to the first completion marker: the echoed command, its output and
    /// the prompt. `timeout` defaults to the session's command timeout.
    ///
    /// # Errors
    /// [`Error::NotInitialized`] or [`Error::NotReady`] when the session is
    /// not ready, [`Error::CommandTimeout`] when no marker shows up in time.
    pub async fn dispatch(&self, command: &str, timeout: Option<Duration>) -> Result<String> {
        let config = self.config();
        let command = Command::new(
            command,
            timeout.unwrap_or_else(|| config.command_timeout()),
            config.completion_markers.clone(),
        );
        self.dispatch_command(&command).await
    }

    /// Run a prepared [`Command`]
    pub async fn dispatch_command(&self, command: &Command) -> Result<String> {
        if command.text.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let _gate = self.inner.command_gate.lock().await;
        let (machine, queue) = self.inner.live_channel()?;
        debug!(command_id = %command.id, "Dispatching command: {}", command.text);

        let (reply_tx, reply_rx) = oneshot::channel();
        queue
            .send(PumpMessage::BeginWindow {
                markers: command.markers.clone(),
                reply: reply_tx,
            })
            .map_err(|_| Error::NotInitialized)?;
        let completion = reply_rx.await.map_err(|_| Error::NotInitialized)?;

        machine.send_serial(&command.wire_bytes())?;

        match tokio::time::timeout(command.timeout, completion).await {
            Ok(Ok(transcript)) => {
                debug!(
                    command_id = %command.id,
                    "Command completed with {} chars of transcript",
                    transcript.len()
                );
                Ok(transcript)
            }
            // Waiter dropped: the session was torn down mid-command
            Ok(Err(_)) => Err(Error::NotInitialized),
            Err(_) => {
                warn!(
                    command_id = %command.id,
                    "Command '{}' timed out after {:?}",
                    command.text,
                    command.timeout
                );
                Err(Error::CommandTimeout {
                    command: command.text.clone(),
                    duration: command.timeout,
                })
            }
        }
    }

    /// Type a line into the guest without waiting for it to finish
    ///
    /// Still serialized with commands so it never lands inside another
    /// command's window.
    pub async fn send_input(&self, text: &str) -> Result<()> {
        let _gate = self.inner.command_gate.lock().await;
        let (machine, _) = self.inner.live_channel()?;
        debug!("Sending raw input ({} bytes)", text.len());
        machine.send_serial(format!("{}\n", text).as_bytes())
    }
}
