//! Byte Stream Demuxer
//!
//! Turns the machine's raw serial bytes into a logical text buffer and
//! re-evaluates registered triggers after every appended character.

use super::triggers::{FiredTrigger, TriggerSet};

/// Result of feeding bytes into the demuxer
#[derive(Debug, Default)]
pub struct DemuxOutput {
    /// Characters appended to the buffer, carriage returns removed
    pub text: String,
    /// Triggers that matched while appending, in firing order
    pub fired: Vec<FiredTrigger>,
}

/// Serial output accumulator
///
/// The buffer grows without bound until [`SerialDemuxer::clear`] is called;
/// the command dispatcher clears it at the start of every command.
#[derive(Debug, Default)]
pub struct SerialDemuxer {
    buffer: String,
    triggers: TriggerSet,
    bytes_seen: u64,
    bytes_dropped: u64,
}

impl SerialDemuxer {
    /// Create an empty demuxer
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one serial byte
    ///
    /// Each byte is one character (Latin-1 code point). Carriage returns are
    /// dropped so `\r\n` normalizes to `\n`.
    pub fn decode(byte: u8) -> Option<char> {
        match byte {
            b'\r' => None,
            b => Some(char::from(b)),
        }
    }

    /// Append one byte and evaluate triggers
    pub fn push_byte(&mut self, byte: u8) -> DemuxOutput {
        let mut out = DemuxOutput::default();
        self.push_into(byte, &mut out);
        out
    }

    /// Append a run of bytes, evaluating triggers after each character
    pub fn push_bytes(&mut self, bytes: &[u8]) -> DemuxOutput {
        let mut out = DemuxOutput::default();
        for &byte in bytes {
            self.push_into(byte, &mut out);
        }
        out
    }

    fn push_into(&mut self, byte: u8, out: &mut DemuxOutput) {
        self.bytes_seen += 1;
        let Some(ch) = Self::decode(byte) else {
            self.bytes_dropped += 1;
            return;
        };

        self.buffer.push(ch);
        out.text.push(ch);
        out.fired.extend(self.triggers.evaluate(&self.buffer));
    }

    /// Current buffer contents
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Start a fresh observation window
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Clear the buffer and return what it held
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Registered triggers and waiters
    pub fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }

    pub fn triggers_mut(&mut self) -> &mut TriggerSet {
        &mut self.triggers
    }

    /// Total bytes received, including dropped carriage returns
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Carriage returns discarded so far
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }
}
