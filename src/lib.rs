#![deny(missing_docs)]
//! WhatsApp dialog bridge
//!
//! Delivers dialog-engine turns to WhatsApp users through the Cloud API with
//! per-recipient pacing, rate-limit backoff and an inbound gate.

/// Dialog turn delivery
pub mod bridge;
/// WhatsApp channel client and message model
pub mod channel;
/// Configuration management
pub mod config;
/// Dialog engine turn translation
pub mod dialog;
/// Pacing, backoff and inbound gating
pub mod pacing;

#[cfg(test)]
pub mod testing;
