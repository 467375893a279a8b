//! Post-send pause for media messages
//!
//! WhatsApp clients take a while to fetch and render an image or audio clip.
//! Sending the next message right away lets text overtake the media, so the
//! pacer waits for a time proportional to the asset size.

use crate::channel::DeliveryClient;
use crate::config::PacingConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Converts a media asset's byte size into an extra pause
#[derive(Clone)]
pub struct MediaTimingEstimator {
    client: Arc<dyn DeliveryClient>,
    ms_per_kb: u64,
    probe_fallback: Duration,
}

impl MediaTimingEstimator {
    /// Create an estimator that probes through `client`
    #[must_use]
    pub fn new(client: Arc<dyn DeliveryClient>, config: &PacingConfig) -> Self {
        Self {
            client,
            ms_per_kb: config.media_ms_per_kb,
            probe_fallback: config.media_probe_fallback,
        }
    }

    /// Pause to apply after sending the media at `url`.
    ///
    /// Probe failure yields the fixed fallback; a successful probe without a
    /// size yields no pause.
    pub async fn estimate_extra_delay(&self, url: &str) -> Duration {
        match self.client.probe_size(url).await {
            Ok(Some(bytes)) => {
                let pause = pause_for_bytes(bytes, self.ms_per_kb);
                debug!("Media {url}: {bytes} bytes, pausing {}ms", pause.as_millis());
                pause
            }
            Ok(None) => {
                debug!("Media {url}: size unknown, no extra pause");
                Duration::ZERO
            }
            Err(e) => {
                warn!("Failed to fetch media size for {url}: {e}");
                self.probe_fallback
            }
        }
    }
}

/// `bytes / 1024 * ms_per_kb`, kept at microsecond precision
#[must_use]
pub fn pause_for_bytes(bytes: u64, ms_per_kb: u64) -> Duration {
    let micros = u128::from(bytes) * u128::from(ms_per_kb) * 1_000 / 1_024;
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}
