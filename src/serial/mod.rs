//! Serial Channel Processing
//!
//! Byte-level handling of the machine's serial console: decoding output into
//! a text buffer and matching markers against it.

pub mod demux;
pub mod triggers;

pub use demux::{DemuxOutput, SerialDemuxer};
pub use triggers::{FiredTrigger, TriggerAction, TriggerId, TriggerMatch, TriggerSet};
