//! Outbound pacing core
//!
//! [`ledger::BackoffLedger`] holds per-recipient timing state,
//! [`pacer::MessagePacer`] sends batches against it,
//! [`gate::InboundGate`] reads it to hold back inbound traffic, and
//! [`media::MediaTimingEstimator`] sizes the pause after media messages.

/// Inbound message gate
pub mod gate;
/// Per-recipient backoff state
pub mod ledger;
/// Media post-send pause
pub mod media;
/// Batch sender
pub mod pacer;

pub use gate::{GateMode, InboundGate};
pub use ledger::{BackoffLedger, RecipientState};
pub use media::MediaTimingEstimator;
pub use pacer::{BatchReport, MessageOutcome, MessagePacer, MessageStatus};
