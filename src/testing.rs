//! Testing helpers and mock utilities.

use crate::channel::{DeliveryError, MockDeliveryClient};
use crate::config::PacingConfig;
use crate::pacing::ledger::BackoffLedger;
use crate::pacing::pacer::MessagePacer;
use std::sync::Arc;

/// Error the Cloud API returns for too many messages to one user
#[must_use]
pub fn pair_rate_limit() -> DeliveryError {
    DeliveryError::RateLimited {
        code: Some(131_056),
        message: "(#131056) (Business Account, Consumer Account) pair rate limit hit".to_string(),
    }
}

/// Pacer over a fresh ledger and the given mock client
#[must_use]
pub fn pacer_with(mock: MockDeliveryClient, config: PacingConfig) -> MessagePacer {
    let ledger = BackoffLedger::new(&config);
    MessagePacer::new(ledger, Arc::new(mock), &config)
}
