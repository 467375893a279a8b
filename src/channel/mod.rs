//! WhatsApp delivery channel
//!
//! Message model, Cloud API wire format and the client that talks to the
//! Graph API.

/// Graph API client
pub mod graph;
/// Outbound message model
pub mod message;
/// Cloud API request bodies
pub mod wire;

use thiserror::Error;
use wire::WireMessage;

/// Errors returned by a delivery attempt or a media probe
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The channel asked us to slow down for this recipient
    #[error("Rate limited (code {code:?}): {message}")]
    RateLimited {
        /// Cloud API error code, if the body carried one
        code: Option<i64>,
        /// Error message from the API
        message: String,
    },
    /// Request rejected for a reason other than rate limiting
    #[error("Rejected with status {status} (code {code:?}): {message}")]
    ClientRejected {
        /// HTTP status
        status: u16,
        /// Cloud API error code, if the body carried one
        code: Option<i64>,
        /// Error message from the API
        message: String,
    },
    /// The API failed on its side
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP status
        status: u16,
        /// Error message from the API
        message: String,
    },
    /// Connection, TLS or timeout failure
    #[error("Network error: {0}")]
    Transport(String),
    /// Request body could not be encoded
    #[error("JSON error: {0}")]
    Json(String),
}

impl DeliveryError {
    /// Whether the error should trigger backoff and a retry
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Sends messages and probes media over the WhatsApp channel
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Send one message from the business number `channel_id`
    async fn send(&self, channel_id: &str, message: &WireMessage) -> Result<(), DeliveryError>;

    /// Byte size of the resource at `url`, if the server reports it
    async fn probe_size(&self, url: &str) -> Result<Option<u64>, DeliveryError>;
}
