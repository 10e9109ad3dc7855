//! Trigger/Pattern Matching
//!
//! Watches the accumulating serial buffer for known markers (shell prompts,
//! sentinel strings). A trigger fires when the buffer *ends with* its
//! pattern, so it only matches the most recently produced text.

use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Callback run when a trigger matches
pub type TriggerAction = Arc<dyn Fn(&TriggerMatch) + Send + Sync>;

/// Identifier handed out on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(u64);

/// Details passed to a trigger action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    /// Trigger that fired
    pub id: TriggerId,
    /// Pattern that matched
    pub pattern: String,
    /// Buffer length (in chars) at the time of the match
    pub buffer_len: usize,
}

struct Trigger {
    id: TriggerId,
    pattern: String,
    repeatable: bool,
    armed: bool,
    action: TriggerAction,
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("repeatable", &self.repeatable)
            .field("armed", &self.armed)
            .finish()
    }
}

/// Single-resolution waiter, resolved with the buffer contents on first match
#[derive(Debug)]
struct Waiter {
    patterns: Vec<String>,
    tx: oneshot::Sender<String>,
}

/// A trigger that matched and whose action still has to run
///
/// Actions are returned instead of run in place so the caller can release
/// any lock guarding the buffer first.
pub struct FiredTrigger {
    action: TriggerAction,
    matched: TriggerMatch,
}

impl FiredTrigger {
    /// Run the trigger's action
    pub fn fire(self) {
        (self.action)(&self.matched);
    }

    /// Match details
    pub fn matched(&self) -> &TriggerMatch {
        &self.matched
    }
}

impl fmt::Debug for FiredTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiredTrigger")
            .field("matched", &self.matched)
            .finish()
    }
}

/// Ordered set of triggers plus pending waiters
#[derive(Debug, Default)]
pub struct TriggerSet {
    triggers: Vec<Trigger>,
    waiters: Vec<Waiter>,
    next_id: u64,
}

fn suffix_matches(buffer: &str, pattern: &str) -> bool {
    !pattern.is_empty() && buffer.ends_with(pattern)
}

impl TriggerSet {
    /// Create an empty trigger set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger
    ///
    /// Repeatable triggers fire on every recurrence of the pattern. One-shot
    /// triggers fire once and then stay registered but disarmed.
    pub fn register<F>(&mut self, pattern: impl Into<String>, repeatable: bool, action: F) -> TriggerId
    where
        F: Fn(&TriggerMatch) + Send + Sync + 'static,
    {
        let id = TriggerId(self.next_id);
        self.next_id += 1;
        self.triggers.push(Trigger {
            id,
            pattern: pattern.into(),
            repeatable,
            armed: true,
            action: Arc::new(action),
        });
        id
    }

    /// Remove a trigger; returns false if it was not registered
    pub fn remove(&mut self, id: TriggerId) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.id != id);
        self.triggers.len() != before
    }

    /// Re-arm a one-shot trigger that already fired
    pub fn rearm(&mut self, id: TriggerId) -> bool {
        match self.triggers.iter_mut().find(|t| t.id == id) {
            Some(trigger) => {
                trigger.armed = true;
                true
            }
            None => false,
        }
    }

    /// Whether a trigger is registered and still able to fire
    pub fn is_armed(&self, id: TriggerId) -> bool {
        self.triggers.iter().any(|t| t.id == id && t.armed)
    }

    /// Number of registered triggers
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Await the next time the buffer ends with `pattern`
    pub fn wait_for(&mut self, pattern: impl Into<String>) -> oneshot::Receiver<String> {
        self.wait_for_any(vec![pattern.into()])
    }

    /// Await the next time the buffer ends with any of `patterns`
    ///
    /// Dropping the receiver cancels the wait.
    pub fn wait_for_any(&mut self, patterns: Vec<String>) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(Waiter { patterns, tx });
        rx
    }

    /// Number of waiters that have not resolved or been cancelled
    pub fn pending_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.tx.is_closed()).count()
    }

    /// Drop every pending waiter; their receivers observe cancellation
    pub fn cancel_waiters(&mut self) {
        self.waiters.clear();
    }

    /// Evaluate every trigger and waiter against the current buffer
    pub fn evaluate(&mut self, buffer: &str) -> Vec<FiredTrigger> {
        let mut fired = Vec::new();
        let mut buffer_len = None;

        for trigger in self.triggers.iter_mut() {
            if !trigger.armed || !suffix_matches(buffer, &trigger.pattern) {
                continue;
            }
            if !trigger.repeatable {
                trigger.armed = false;
            }
            let len = *buffer_len.get_or_insert_with(|| buffer.chars().count());
            fired.push(FiredTrigger {
                action: Arc::clone(&trigger.action),
                matched: TriggerMatch {
                    id: trigger.id,
                    pattern: trigger.pattern.clone(),
                    buffer_len: len,
                },
            });
        }

        if !self.waiters.is_empty() {
            let waiters = std::mem::take(&mut self.waiters);
            for waiter in waiters {
                if waiter.tx.is_closed() {
                    continue;
                }
                if waiter.patterns.iter().any(|p| suffix_matches(buffer, p)) {
                    // Receiver may drop between the check and the send
                    let _ = waiter.tx.send(buffer.to_string());
                } else {
                    self.waiters.push(waiter);
                }
            }
        }

        fired
    }
}
