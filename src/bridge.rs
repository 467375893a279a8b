//! Wiring between dialog turns, the inbound gate and the pacer.

use crate::channel::DeliveryClient;
use crate::config::PacingConfig;
use crate::dialog::{plan_turn, Directive};
use crate::pacing::{BackoffLedger, BatchReport, InboundGate, MessagePacer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Result of delivering one dialog turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// Per-message delivery outcomes
    pub report: BatchReport,
    /// No-reply timeout requested by the dialog, in seconds.
    ///
    /// Not scheduled here: the caller owns the timer and reports the no-reply
    /// event back to the dialog engine when it fires.
    pub no_reply_timeout_secs: Option<f64>,
    /// Whether the dialog session ended with this turn
    pub ends_session: bool,
}

/// One ledger shared by the gate and the pacer
#[derive(Clone)]
pub struct DialogBridge {
    pacer: MessagePacer,
    gate: InboundGate,
}

impl DialogBridge {
    /// Build the pacing core around `client`
    #[must_use]
    pub fn new(client: Arc<dyn DeliveryClient>, config: &PacingConfig) -> Self {
        let ledger = BackoffLedger::new(config);
        Self {
            pacer: MessagePacer::new(ledger.clone(), client, config),
            gate: InboundGate::new(ledger, config.gate_mode),
        }
    }

    /// Shared ledger
    #[must_use]
    pub const fn ledger(&self) -> &BackoffLedger {
        self.pacer.ledger()
    }

    /// `false` when an inbound message from `recipient` must be dropped
    pub async fn accept_inbound(&self, recipient: &str) -> bool {
        !self.gate.should_drop(recipient).await
    }

    /// Translate `directives` and send the resulting batch to `recipient`
    pub async fn deliver_turn(
        &self,
        recipient: &str,
        channel_id: &str,
        directives: &[Directive],
    ) -> TurnOutcome {
        let plan = plan_turn(directives);
        let report = self
            .pacer
            .send_batch(recipient, channel_id, &plan.messages)
            .await;

        info!(
            "Turn for {recipient}: {}/{} delivered{}",
            report.delivered(),
            plan.messages.len(),
            if plan.ends_session { ", session ended" } else { "" }
        );

        TurnOutcome {
            report,
            no_reply_timeout_secs: plan.no_reply_timeout.as_ref().map(Duration::as_secs_f64),
            ends_session: plan.ends_session,
        }
    }
}
