//! Paced delivery of message batches
//!
//! A batch is every message one dialog turn produced for one recipient. The
//! pacer sends them strictly in order, keeps the recipient's minimum spacing
//! between consecutive sends, backs off and retries on rate limits, and pauses
//! after media so the client has time to render it.

use super::ledger::BackoffLedger;
use super::media::MediaTimingEstimator;
use crate::channel::message::OutboundMessage;
use crate::channel::wire::WireMessage;
use crate::channel::DeliveryClient;
use crate::config::PacingConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// What happened to one message of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MessageStatus {
    /// Accepted by the channel after `attempts` sends
    Delivered {
        /// Send attempts, including rate-limited ones
        attempts: u32,
    },
    /// Not sendable on its own (prompt body or unknown type)
    Skipped,
    /// Failed with a non-retryable error
    Abandoned {
        /// Last error
        error: String,
    },
    /// Still rate limited when the retry budget ran out
    GaveUp {
        /// Send attempts made
        attempts: u32,
        /// Last error
        error: String,
    },
}

/// Outcome of one message, by position in the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageOutcome {
    /// Position in the batch
    pub index: usize,
    /// Message kind
    pub kind: &'static str,
    /// Result
    #[serde(flatten)]
    pub status: MessageStatus,
}

/// Per-message outcomes of [`MessagePacer::send_batch`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Outcomes in batch order
    pub outcomes: Vec<MessageOutcome>,
}

impl BatchReport {
    fn push(&mut self, index: usize, message: &OutboundMessage, status: MessageStatus) {
        self.outcomes.push(MessageOutcome {
            index,
            kind: message.kind(),
            status,
        });
    }

    /// Number of delivered messages
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, MessageStatus::Delivered { .. }))
            .count()
    }

    /// Messages that were meant to be sent but were not
    #[must_use]
    pub fn failed(&self) -> Vec<&MessageOutcome> {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.status,
                    MessageStatus::Abandoned { .. } | MessageStatus::GaveUp { .. }
                )
            })
            .collect()
    }

    /// `true` when every sendable message was delivered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed().is_empty()
    }
}

/// Sends batches with per-recipient pacing and rate-limit backoff
#[derive(Clone)]
pub struct MessagePacer {
    ledger: BackoffLedger,
    client: Arc<dyn DeliveryClient>,
    estimator: MediaTimingEstimator,
    default_prompt: String,
    max_rate_limit_retries: u32,
    max_retry_elapsed: Duration,
}

impl MessagePacer {
    /// Create a pacer sharing `ledger` with the rest of the bridge
    #[must_use]
    pub fn new(
        ledger: BackoffLedger,
        client: Arc<dyn DeliveryClient>,
        config: &PacingConfig,
    ) -> Self {
        let estimator = MediaTimingEstimator::new(Arc::clone(&client), config);
        Self {
            ledger,
            client,
            estimator,
            default_prompt: config.default_button_prompt.clone(),
            max_rate_limit_retries: config.max_rate_limit_retries,
            max_retry_elapsed: config.max_retry_elapsed,
        }
    }

    /// Ledger this pacer records into
    #[must_use]
    pub const fn ledger(&self) -> &BackoffLedger {
        &self.ledger
    }

    /// Sends `messages` to `recipient` from the business number `channel_id`.
    ///
    /// Messages go out in order, one at a time. Only one batch per recipient
    /// runs at a time; a second batch waits for the first to finish. The call
    /// never fails: every message gets an outcome in the returned report.
    pub async fn send_batch(
        &self,
        recipient: &str,
        channel_id: &str,
        messages: &[OutboundMessage],
    ) -> BatchReport {
        let mut report = BatchReport::default();
        if messages.is_empty() {
            return report;
        }

        let _flight = self.ledger.acquire(recipient).await;
        debug!("Sending {} message(s) to {recipient}", messages.len());

        for (index, message) in messages.iter().enumerate() {
            let previous = index.checked_sub(1).and_then(|i| messages.get(i));
            let Some(wire) =
                WireMessage::render(recipient, message, previous, &self.default_prompt)
            else {
                debug!("Skipping {} message #{index} for {recipient}", message.kind());
                report.push(index, message, MessageStatus::Skipped);
                continue;
            };

            let status = self.deliver(recipient, channel_id, message, &wire).await;
            report.push(index, message, status);
        }

        report
    }

    async fn wait_for_turn(&self, recipient: &str) {
        let wait = self.ledger.delay_required_for(recipient).await;
        if !wait.is_zero() {
            debug!("Waiting {}ms before sending to {recipient}", wait.as_millis());
            sleep(wait).await;
        }
    }

    async fn deliver(
        &self,
        recipient: &str,
        channel_id: &str,
        message: &OutboundMessage,
        wire: &WireMessage,
    ) -> MessageStatus {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            self.wait_for_turn(recipient).await;
            attempts += 1;

            let err = match self.client.send(channel_id, wire).await {
                Ok(()) => {
                    self.ledger.record_success(recipient).await;
                    info!("Message sent to {recipient}: {}", message.kind());
                    self.pause_after_media(message).await;
                    return MessageStatus::Delivered { attempts };
                }
                Err(e) => e,
            };

            if !err.is_rate_limited() {
                warn!("Failed to send {} to {recipient}: {err}", message.kind());
                return MessageStatus::Abandoned {
                    error: err.to_string(),
                };
            }

            let backoff = self.ledger.record_rate_limited(recipient).await;
            let retries_used = attempts - 1;
            if retries_used >= self.max_rate_limit_retries
                || started.elapsed() + backoff > self.max_retry_elapsed
            {
                warn!(
                    "Giving up on {} to {recipient} after {attempts} rate-limited attempt(s): {err}",
                    message.kind()
                );
                self.ledger.record_gave_up(recipient).await;
                return MessageStatus::GaveUp {
                    attempts,
                    error: err.to_string(),
                };
            }

            warn!(
                "Rate limited sending to {recipient}, retrying in {}ms: {err}",
                backoff.as_millis()
            );
            sleep(backoff).await;
        }
    }

    async fn pause_after_media(&self, message: &OutboundMessage) {
        let Some(url) = message.media_url() else {
            return;
        };
        let pause = self.estimator.estimate_extra_delay(url).await;
        if !pause.is_zero() {
            sleep(pause).await;
        }
    }
}
