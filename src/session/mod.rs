//! Execution Session
//!
//! Owns one emulated machine and everything around it: the readiness state
//! machine, the output pump feeding the serial demuxer, the command gate and
//! the lifecycle event bus. A [`Session`] is a cheap cloneable handle; all
//! clones drive the same machine.
//!
//! ```text
//! machine ──events──▶ queue ──▶ pump ──▶ demuxer ──▶ triggers / waiters
//!    ▲                                        │
//!    └──── send_serial ◀── dispatch ◀─────────┘ transcript
//! ```

pub mod config;
pub mod dispatch;
pub mod events;
mod pump;
pub mod state;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use config::{ReadinessMode, SessionConfig};
pub use dispatch::Command;
pub use events::{SessionEvent, SessionEventBus, SessionSubscription};
pub use state::ReadyState;

use crate::error::{Error, Result};
use crate::machine::{Machine, MachineConfig, MachineEventSink, MachineFactory};
use crate::serial::{SerialDemuxer, TriggerId, TriggerMatch};
use pump::{BootSignal, Pump, PumpMessage};

/// Why an initialization did not reach Ready; shared by every waiter
#[derive(Debug, Clone, PartialEq, Eq)]
enum InitFailure {
    Timeout(Duration),
    Failed(String),
}

impl InitFailure {
    fn abandoned() -> Self {
        InitFailure::Failed("initialization abandoned by destroy".to_string())
    }

    fn from_error(error: Error) -> Self {
        match error {
            Error::BootTimeout { duration } => InitFailure::Timeout(duration),
            other => InitFailure::Failed(other.to_string()),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            InitFailure::Timeout(duration) => Error::BootTimeout {
                duration: *duration,
            },
            InitFailure::Failed(reason) => Error::InitializationFailed {
                reason: reason.clone(),
            },
        }
    }
}

type InitFuture = Shared<BoxFuture<'static, std::result::Result<(), InitFailure>>>;

#[derive(Default)]
struct Lifecycle {
    state: ReadyState,
    /// Bumped by every init and destroy; stale initializations back off
    epoch: u64,
    machine: Option<Arc<dyn Machine>>,
    queue: Option<mpsc::UnboundedSender<PumpMessage>>,
    pump: Option<JoinHandle<()>>,
    pending: Option<InitFuture>,
    failure: Option<InitFailure>,
    boot_trigger: Option<TriggerId>,
}

pub(crate) struct SessionInner {
    factory: Arc<dyn MachineFactory>,
    machine_config: MachineConfig,
    config: SessionConfig,
    lifecycle: Mutex<Lifecycle>,
    serial: Arc<Mutex<SerialDemuxer>>,
    command_gate: tokio::sync::Mutex<()>,
    events: SessionEventBus,
}

impl SessionInner {
    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_serial(&self) -> MutexGuard<'_, SerialDemuxer> {
        self.serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, lifecycle: &mut Lifecycle, to: ReadyState) {
        let from = lifecycle.state;
        if from == to {
            return;
        }
        lifecycle.state = to;
        info!("Session state: {} -> {}", from, to);
        self.events.publish(SessionEvent::StateChanged { from, to });
    }

    /// Machine and pump queue of a Ready session
    fn live_channel(&self) -> Result<(Arc<dyn Machine>, mpsc::UnboundedSender<PumpMessage>)> {
        let lifecycle = self.lock_lifecycle();
        match lifecycle.state {
            ReadyState::Ready => match (&lifecycle.machine, &lifecycle.queue) {
                (Some(machine), Some(queue)) => Ok((Arc::clone(machine), queue.clone())),
                _ => Err(Error::NotInitialized),
            },
            ReadyState::Uninitialized | ReadyState::Destroyed => Err(Error::NotInitialized),
            other => Err(Error::NotReady {
                state: other.to_string(),
            }),
        }
    }

    /// An error event after boot fails the running session
    fn fail_running(&self, epoch: u64, reason: &str) {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.epoch == epoch && lifecycle.state == ReadyState::Ready {
            lifecycle.failure = Some(InitFailure::Failed(reason.to_string()));
            self.transition(&mut lifecycle, ReadyState::Failed);
        }
    }

    async fn initialize(self: Arc<Self>, epoch: u64) -> std::result::Result<(), InitFailure> {
        info!("Initializing machine via {} backend", self.factory.name());
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (boot_tx, boot_rx) = mpsc::unbounded_channel();

        let boot_trigger = {
            let mut serial = self.lock_serial();
            serial.clear();
            serial.triggers_mut().cancel_waiters();
            if self.config.readiness == ReadinessMode::EngineEvent {
                None
            } else {
                let prompt_tx = boot_tx.clone();
                Some(
                    serial
                        .triggers_mut()
                        .register(self.config.boot_prompt.clone(), false, move |_| {
                            let _ = prompt_tx.send(BootSignal::Prompt);
                        }),
                )
            }
        };

        let pump = Pump {
            serial: Arc::clone(&self.serial),
            events: self.events.clone(),
            boot: boot_tx,
            session: Arc::downgrade(&self),
            epoch,
        };
        let pump_handle = tokio::spawn(pump.run(queue_rx));

        let orphaned = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.epoch == epoch {
                lifecycle.pump = Some(pump_handle);
                lifecycle.queue = Some(queue_tx.clone());
                lifecycle.boot_trigger = boot_trigger;
                None
            } else {
                Some(pump_handle)
            }
        };
        if let Some(pump_handle) = orphaned {
            pump_handle.abort();
            if let Some(id) = boot_trigger {
                self.lock_serial().triggers_mut().remove(id);
            }
            return Err(InitFailure::abandoned());
        }

        let boot_timeout = self.config.boot_timeout();
        let outcome = match tokio::time::timeout(boot_timeout, self.bring_up(epoch, queue_tx, boot_rx)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(InitFailure::Timeout(boot_timeout)),
        };
        self.finish_initialization(epoch, outcome).await
    }

    /// Construct the machine and wait for its readiness signal
    async fn bring_up(
        &self,
        epoch: u64,
        queue: mpsc::UnboundedSender<PumpMessage>,
        signals: mpsc::UnboundedReceiver<BootSignal>,
    ) -> std::result::Result<(), InitFailure> {
        let sink = MachineEventSink::from_fn(move |event| queue.send(PumpMessage::Machine(event)).is_ok());
        let machine: Arc<dyn Machine> = match self.factory.create(&self.machine_config, sink).await {
            Ok(machine) => Arc::from(machine),
            Err(e) => return Err(InitFailure::from_error(e)),
        };

        let stale = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.epoch == epoch {
                lifecycle.machine = Some(Arc::clone(&machine));
                false
            } else {
                true
            }
        };
        if stale {
            debug!("Destroy raced initialization; discarding new machine");
            if let Err(e) = machine.destroy().await {
                warn!("Failed to destroy abandoned machine: {}", e);
            }
            return Err(InitFailure::abandoned());
        }

        wait_for_boot(signals, self.config.readiness).await
    }

    async fn finish_initialization(
        &self,
        epoch: u64,
        outcome: std::result::Result<(), InitFailure>,
    ) -> std::result::Result<(), InitFailure> {
        match outcome {
            Ok(()) => {
                {
                    let mut lifecycle = self.lock_lifecycle();
                    if lifecycle.epoch != epoch {
                        return Err(InitFailure::abandoned());
                    }
                    lifecycle.pending = None;
                    self.transition(&mut lifecycle, ReadyState::Ready);
                }
                info!("Machine ready");
                self.events.publish(SessionEvent::Ready);
                Ok(())
            }
            Err(failure) => {
                let (machine, pump, trigger) = {
                    let mut lifecycle = self.lock_lifecycle();
                    if lifecycle.epoch != epoch {
                        return Err(failure);
                    }
                    lifecycle.pending = None;
                    lifecycle.queue = None;
                    lifecycle.failure = Some(failure.clone());
                    self.transition(&mut lifecycle, ReadyState::Failed);
                    (
                        lifecycle.machine.take(),
                        lifecycle.pump.take(),
                        lifecycle.boot_trigger.take(),
                    )
                };
                let error = failure.to_error();
                error!("Machine initialization failed: {}", error);
                self.events.publish(SessionEvent::Error(error.to_string()));
                self.teardown(machine, pump, trigger, false).await;
                Err(failure)
            }
        }
    }

    async fn teardown(
        &self,
        machine: Option<Arc<dyn Machine>>,
        pump: Option<JoinHandle<()>>,
        trigger: Option<TriggerId>,
        clear_buffer: bool,
    ) {
        if let Some(machine) = machine {
            if let Err(e) = machine.destroy().await {
                warn!("Machine teardown failed: {}", e);
            }
        }
        if let Some(pump) = pump {
            pump.abort();
        }

        let mut serial = self.lock_serial();
        if let Some(id) = trigger {
            serial.triggers_mut().remove(id);
        }
        serial.triggers_mut().cancel_waiters();
        if clear_buffer {
            serial.clear();
        }
    }
}

async fn wait_for_boot(
    mut signals: mpsc::UnboundedReceiver<BootSignal>,
    mode: ReadinessMode,
) -> std::result::Result<(), InitFailure> {
    let (mut engine, mut prompt) = (false, false);
    while let Some(signal) = signals.recv().await {
        match signal {
            BootSignal::EngineReady => engine = true,
            BootSignal::Prompt => prompt = true,
            BootSignal::Error(reason) => return Err(InitFailure::Failed(reason)),
        }

        let ready = match mode {
            ReadinessMode::EngineEvent => engine,
            ReadinessMode::BootPrompt => prompt,
            ReadinessMode::Either => engine || prompt,
            ReadinessMode::Both => engine && prompt,
        };
        if ready {
            return Ok(());
        }
    }
    Err(InitFailure::abandoned())
}

/// Handle to an execution session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session; nothing is constructed until [`Session::ensure_ready`]
    pub fn new(factory: Arc<dyn MachineFactory>, machine: MachineConfig, config: SessionConfig) -> Self {
        let events = SessionEventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(SessionInner {
                factory,
                machine_config: machine,
                config,
                lifecycle: Mutex::new(Lifecycle::default()),
                serial: Arc::new(Mutex::new(SerialDemuxer::new())),
                command_gate: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    /// Create a session from a loaded configuration
    pub fn from_config(factory: Arc<dyn MachineFactory>, config: &crate::config::Config) -> Self {
        Self::new(factory, config.machine.clone(), config.session.clone())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn machine_config(&self) -> &MachineConfig {
        &self.inner.machine_config
    }

    /// Current readiness state
    pub fn state(&self) -> ReadyState {
        self.inner.lock_lifecycle().state
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// The stored failure of a Failed session
    pub fn last_failure(&self) -> Option<Error> {
        self.inner.lock_lifecycle().failure.as_ref().map(InitFailure::to_error)
    }

    /// Subscribe to lifecycle and output events
    pub fn subscribe(&self) -> SessionSubscription {
        self.inner.events.subscribe()
    }

    /// Snapshot of the serial buffer since the last clear
    pub fn transcript(&self) -> String {
        self.inner.lock_serial().buffer().to_string()
    }

    /// Register a trigger on the serial buffer
    ///
    /// User triggers survive `destroy` and apply to the next machine.
    pub fn add_trigger<F>(&self, pattern: impl Into<String>, repeatable: bool, action: F) -> TriggerId
    where
        F: Fn(&TriggerMatch) + Send + Sync + 'static,
    {
        self.inner
            .lock_serial()
            .triggers_mut()
            .register(pattern, repeatable, action)
    }

    pub fn remove_trigger(&self, id: TriggerId) -> bool {
        self.inner.lock_serial().triggers_mut().remove(id)
    }

    /// Resolve with the buffer the next time it ends with `pattern`
    pub fn wait_for(&self, pattern: impl Into<String>) -> oneshot::Receiver<String> {
        self.inner.lock_serial().triggers_mut().wait_for(pattern)
    }

    /// Bring the machine up, or wait for the bring-up already in flight
    ///
    /// Concurrent callers share one initialization and observe the same
    /// outcome. A failed session keeps reporting its failure until
    /// [`Session::destroy`] is called.
    ///
    /// # Errors
    /// [`Error::BootTimeout`] when no readiness signal arrives in time,
    /// [`Error::InitializationFailed`] for construction or engine errors.
    pub async fn ensure_ready(&self) -> Result<()> {
        let pending = {
            let mut lifecycle = self.inner.lock_lifecycle();
            match lifecycle.state {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed => {
                    return Err(lifecycle.failure.as_ref().map(InitFailure::to_error).unwrap_or_else(|| {
                        Error::InitializationFailed {
                            reason: "initialization failed".to_string(),
                        }
                    }))
                }
                ReadyState::Initializing => match &lifecycle.pending {
                    Some(pending) => pending.clone(),
                    None => {
                        return Err(Error::NotReady {
                            state: ReadyState::Initializing.to_string(),
                        })
                    }
                },
                ReadyState::Uninitialized | ReadyState::Destroyed => self.start_initialization(&mut lifecycle),
            }
        };

        pending.await.map_err(|failure| failure.to_error())
    }

    fn start_initialization(&self, lifecycle: &mut Lifecycle) -> InitFuture {
        lifecycle.epoch += 1;
        lifecycle.failure = None;
        let epoch = lifecycle.epoch;
        self.inner.transition(lifecycle, ReadyState::Initializing);

        let task = tokio::spawn(Arc::clone(&self.inner).initialize(epoch));
        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(InitFailure::Failed(format!("initialization task failed: {}", e))),
            }
        }
        .boxed()
        .shared();
        lifecycle.pending = Some(pending.clone());
        pending
    }

    /// Tear the machine down and return to a re-initializable state
    ///
    /// Safe to call at any time and any number of times. An initialization
    /// still in flight is abandoned and its machine destroyed.
    pub async fn destroy(&self) {
        let (machine, pump, trigger) = {
            let mut lifecycle = self.inner.lock_lifecycle();
            if lifecycle.state.can_initialize() && lifecycle.machine.is_none() && lifecycle.pending.is_none() {
                debug!("Nothing to destroy");
                return;
            }
            lifecycle.epoch += 1;
            lifecycle.pending = None;
            lifecycle.failure = None;
            lifecycle.queue = None;
            self.inner.transition(&mut lifecycle, ReadyState::Destroyed);
            (
                lifecycle.machine.take(),
                lifecycle.pump.take(),
                lifecycle.boot_trigger.take(),
            )
        };

        info!("Destroying machine");
        self.inner.teardown(machine, pump, trigger, true).await;
        self.inner.events.publish(SessionEvent::Destroyed);
    }

    /// Whether the current machine can create files directly
    pub fn supports_file_injection(&self) -> Option<bool> {
        self.inner
            .lock_lifecycle()
            .machine
            .as_ref()
            .map(|machine| machine.supports_file_injection())
    }

    /// Create a file through the machine's filesystem primitive
    ///
    /// # Errors
    /// [`Error::FileWriteFailed`] when there is no machine.
    pub async fn create_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let machine = self.inner.lock_lifecycle().machine.clone();
        match machine {
            Some(machine) => machine.create_file(path, contents).await,
            None => Err(Error::FileWriteFailed {
                path: path.to_string(),
                reason: "no machine is running".to_string(),
            }),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("backend", &self.inner.factory.name())
            .finish_non_exhaustive()
    }
}
