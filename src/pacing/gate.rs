//! Inbound message gate
//!
//! Drops inbound messages from recipients the bridge is currently holding
//! back, so a user cannot drive a new dialog turn while the previous one is
//! still being paced out.

use super::ledger::BackoffLedger;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::time::Instant;
use tracing::debug;

/// Rule the gate applies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Drop while the recipient has a backoff in force: until the next
    /// successful send, or until it runs out once its message was given up on
    #[default]
    BackoffPresence,
    /// Drop while `now - last_sent_at < max(base, backoff)`
    ActiveWindow,
}

impl FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "backoff_presence" | "presence" => Ok(Self::BackoffPresence),
            "active_window" | "window" => Ok(Self::ActiveWindow),
            other => Err(format!("Unknown inbound gate mode '{other}'")),
        }
    }
}

/// Decides whether an inbound message is forwarded to the dialog engine
#[derive(Debug, Clone)]
pub struct InboundGate {
    ledger: BackoffLedger,
    mode: GateMode,
}

impl InboundGate {
    /// Create a gate reading from `ledger`
    #[must_use]
    pub const fn new(ledger: BackoffLedger, mode: GateMode) -> Self {
        Self { ledger, mode }
    }

    /// Active rule
    #[must_use]
    pub const fn mode(&self) -> GateMode {
        self.mode
    }

    /// `true` when the inbound message from `recipient` must be dropped
    pub async fn should_drop(&self, recipient: &str) -> bool {
        let Some(state) = self.ledger.state_of(recipient).await else {
            return false;
        };

        let drop = match self.mode {
            GateMode::BackoffPresence => state.backing_off(Instant::now()),
            GateMode::ActiveWindow => state.in_window(self.ledger.base_delay(), Instant::now()),
        };
        if drop {
            debug!("Ignoring incoming message from {recipient} due to active delay");
        }
        drop
    }
}
