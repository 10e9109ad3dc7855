//! Output Pump
//!
//! One task per machine drains the machine's event queue in order: serial
//! bytes go through the demuxer, lifecycle events become boot signals, and
//! command windows are opened in the same order as the bytes around them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::events::{SessionEvent, SessionEventBus};
use super::SessionInner;
use crate::machine::MachineEvent;
use crate::serial::{DemuxOutput, SerialDemuxer};

/// Work items for the pump
pub(crate) enum PumpMessage {
    /// Something the machine reported
    Machine(MachineEvent),
    /// Clear the buffer and arm a completion waiter for the next command
    BeginWindow {
        markers: Vec<String>,
        reply: oneshot::Sender<oneshot::Receiver<String>>,
    },
}

/// Boot progress observed by the pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BootSignal {
    EngineReady,
    Prompt,
    Error(String),
}

pub(crate) struct Pump {
    pub(crate) serial: Arc<Mutex<SerialDemuxer>>,
    pub(crate) events: SessionEventBus,
    pub(crate) boot: mpsc::UnboundedSender<BootSignal>,
    pub(crate) session: Weak<SessionInner>,
    pub(crate) epoch: u64,
}

impl Pump {
    fn lock_serial(&self) -> MutexGuard<'_, SerialDemuxer> {
        self.serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain the queue until every sender is gone
    pub(crate) async fn run(self, mut queue: mpsc::UnboundedReceiver<PumpMessage>) {
        debug!("Session pump started (epoch {})", self.epoch);
        while let Some(message) = queue.recv().await {
            let mut output = String::new();
            self.handle(message, &mut output);
            while let Ok(message) = queue.try_recv() {
                self.handle(message, &mut output);
            }
            if !output.is_empty() {
                self.events.publish(SessionEvent::Output(output));
            }
        }
        debug!("Session pump exiting (epoch {})", self.epoch);
    }

    fn handle(&self, message: PumpMessage, output: &mut String) {
        match message {
            PumpMessage::Machine(MachineEvent::OutputByte(byte)) => {
                let DemuxOutput { text, fired } = self.lock_serial().push_byte(byte);
                output.push_str(&text);
                // Lock released; actions may call back into the session
                for trigger in fired {
                    trigger.fire();
                }
            }
            PumpMessage::Machine(MachineEvent::Ready) => {
                debug!("Machine reported ready");
                let _ = self.boot.send(BootSignal::EngineReady);
            }
            PumpMessage::Machine(MachineEvent::Error(message)) => {
                error!("Machine error: {}", message);
                let _ = self.boot.send(BootSignal::Error(message.clone()));
                if let Some(session) = self.session.upgrade() {
                    session.fail_running(self.epoch, &message);
                }
                self.events.publish(SessionEvent::Error(message));
            }
            PumpMessage::BeginWindow { markers, reply } => {
                let completion = {
                    let mut serial = self.lock_serial();
                    serial.clear();
                    serial.triggers_mut().wait_for_any(markers)
                };
                if reply.send(completion).is_err() {
                    debug!("Dispatcher left before its command window opened");
                }
            }
        }
    }
}
