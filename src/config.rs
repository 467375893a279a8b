//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines the
//! pacing defaults used when a key is not set.

use crate::pacing::gate::GateMode;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Graph API version used when `WHATSAPP_VERSION` is not set
pub const DEFAULT_WHATSAPP_VERSION: &str = "v17.0";
/// Graph API host
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com";

/// Minimum spacing between two sends to the same recipient
pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
/// Ceiling for the per-recipient backoff delay
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
/// Extra pause per kilobyte of media after a media message is sent
pub const DEFAULT_MEDIA_MS_PER_KB: u64 = 10;
/// Pause used when a media size probe fails
pub const DEFAULT_MEDIA_PROBE_FALLBACK_MS: u64 = 5_000;
/// Prompt shown above reply buttons that have no preceding text
pub const DEFAULT_BUTTON_PROMPT: &str = "Make your choice";
/// Rate-limit retries allowed for a single message
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 10;
/// Upper bound on time spent retrying a single message
pub const DEFAULT_MAX_RETRY_ELAPSED_SECS: u64 = 600;
/// Recipients untouched for this long are evicted from the ledger
pub const DEFAULT_RECIPIENT_IDLE_TTL_SECS: u64 = 6 * 60 * 60;
/// Maximum number of recipients tracked at once
pub const DEFAULT_RECIPIENT_MAX_ENTRIES: u64 = 100_000;
/// Cloud API error codes that signal a rate limit
/// (130429: throughput reached, 131056: pair rate limit hit)
pub const DEFAULT_RATE_LIMIT_ERROR_CODES: &[i64] = &[130_429, 131_056];
/// HTTP timeout for Graph API calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// WhatsApp Cloud API bearer token
    pub whatsapp_token: String,

    /// Graph API version segment, e.g. `v17.0`
    #[serde(default = "default_whatsapp_version")]
    pub whatsapp_version: String,
    /// Graph API base URL
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    /// Minimum spacing between sends, milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling, milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Post-send pause per media kilobyte, milliseconds
    #[serde(default = "default_media_ms_per_kb")]
    pub media_ms_per_kb: u64,
    /// Pause when the media size probe fails, milliseconds
    #[serde(default = "default_media_probe_fallback_ms")]
    pub media_probe_fallback_ms: u64,

    /// Prompt for reply buttons without a preceding text message
    #[serde(default = "default_button_prompt")]
    pub default_button_prompt: String,

    /// Rate-limit retries allowed per message
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    /// Time budget for retrying one message, seconds
    #[serde(default = "default_max_retry_elapsed_secs")]
    pub max_retry_elapsed_secs: u64,

    /// Idle time before a recipient entry is evicted, seconds
    #[serde(default = "default_recipient_idle_ttl_secs")]
    pub recipient_idle_ttl_secs: u64,
    /// Maximum tracked recipients
    #[serde(default = "default_recipient_max_entries")]
    pub recipient_max_entries: u64,

    /// `backoff_presence` or `active_window`
    #[serde(rename = "inbound_gate_mode")]
    pub inbound_gate_mode_str: Option<String>,

    /// Comma-separated Cloud API error codes treated as rate limits
    #[serde(rename = "rate_limit_error_codes")]
    pub rate_limit_error_codes_str: Option<String>,

    /// Graph API request timeout, seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_whatsapp_version() -> String {
    DEFAULT_WHATSAPP_VERSION.to_string()
}

fn default_graph_api_base() -> String {
    DEFAULT_GRAPH_API_BASE.to_string()
}

const fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

const fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

const fn default_media_ms_per_kb() -> u64 {
    DEFAULT_MEDIA_MS_PER_KB
}

const fn default_media_probe_fallback_ms() -> u64 {
    DEFAULT_MEDIA_PROBE_FALLBACK_MS
}

fn default_button_prompt() -> String {
    DEFAULT_BUTTON_PROMPT.to_string()
}

const fn default_max_rate_limit_retries() -> u32 {
    DEFAULT_MAX_RATE_LIMIT_RETRIES
}

const fn default_max_retry_elapsed_secs() -> u64 {
    DEFAULT_MAX_RETRY_ELAPSED_SECS
}

const fn default_recipient_idle_ttl_secs() -> u64 {
    DEFAULT_RECIPIENT_IDLE_TTL_SECS
}

const fn default_recipient_max_entries() -> u64 {
    DEFAULT_RECIPIENT_MAX_ENTRIES
}

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wa_dialog_bridge::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Not checked into git
            .add_source(File::with_name("config/local").required(false))
            // `APP__BASE_DELAY_MS=500` sets `base_delay_ms`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables; empty values count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Pacing parameters derived from these settings
    #[must_use]
    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            media_ms_per_kb: self.media_ms_per_kb,
            media_probe_fallback: Duration::from_millis(self.media_probe_fallback_ms),
            default_button_prompt: self.default_button_prompt.clone(),
            max_rate_limit_retries: self.max_rate_limit_retries,
            max_retry_elapsed: Duration::from_secs(self.max_retry_elapsed_secs),
            recipient_idle_ttl: Duration::from_secs(self.recipient_idle_ttl_secs),
            recipient_max_entries: self.recipient_max_entries,
            gate_mode: self.gate_mode(),
        }
    }

    /// Inbound gate mode; unknown values fall back to the default
    #[must_use]
    pub fn gate_mode(&self) -> GateMode {
        let Some(raw) = self.inbound_gate_mode_str.as_deref() else {
            return GateMode::default();
        };
        raw.parse().unwrap_or_else(|e| {
            warn!("{e}; using {:?}", GateMode::default());
            GateMode::default()
        })
    }

    /// Cloud API error codes treated as rate limits
    #[must_use]
    pub fn rate_limit_codes(&self) -> Vec<i64> {
        let parsed: Vec<i64> = self
            .rate_limit_error_codes_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|code| code.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default();

        if parsed.is_empty() {
            DEFAULT_RATE_LIMIT_ERROR_CODES.to_vec()
        } else {
            parsed
        }
    }
}

/// Timing and retry parameters shared by the ledger, pacer and gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingConfig {
    /// Minimum spacing between sends to one recipient
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Post-send pause per kilobyte of media
    pub media_ms_per_kb: u64,
    /// Post-send pause when the media size probe fails
    pub media_probe_fallback: Duration,
    /// Prompt for buttons without a preceding text
    pub default_button_prompt: String,
    /// Rate-limit retries allowed per message
    pub max_rate_limit_retries: u32,
    /// Time budget for retrying a single message
    pub max_retry_elapsed: Duration,
    /// Idle time after which a recipient entry is evicted
    pub recipient_idle_ttl: Duration,
    /// Ledger capacity
    pub recipient_max_entries: u64,
    /// How the inbound gate decides to drop
    pub gate_mode: GateMode,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            media_ms_per_kb: DEFAULT_MEDIA_MS_PER_KB,
            media_probe_fallback: Duration::from_millis(DEFAULT_MEDIA_PROBE_FALLBACK_MS),
            default_button_prompt: DEFAULT_BUTTON_PROMPT.to_string(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            max_retry_elapsed: Duration::from_secs(DEFAULT_MAX_RETRY_ELAPSED_SECS),
            recipient_idle_ttl: Duration::from_secs(DEFAULT_RECIPIENT_IDLE_TTL_SECS),
            recipient_max_entries: DEFAULT_RECIPIENT_MAX_ENTRIES,
            gate_mode: GateMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn bare_settings() -> Settings {
        Settings {
            whatsapp_token: "dummy".to_string(),
            whatsapp_version: default_whatsapp_version(),
            graph_api_base: default_graph_api_base(),
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            media_ms_per_kb: DEFAULT_MEDIA_MS_PER_KB,
            media_probe_fallback_ms: DEFAULT_MEDIA_PROBE_FALLBACK_MS,
            default_button_prompt: default_button_prompt(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            max_retry_elapsed_secs: DEFAULT_MAX_RETRY_ELAPSED_SECS,
            recipient_idle_ttl_secs: DEFAULT_RECIPIENT_IDLE_TTL_SECS,
            recipient_max_entries: DEFAULT_RECIPIENT_MAX_ENTRIES,
            inbound_gate_mode_str: None,
            rate_limit_error_codes_str: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }

    // Single test touches the process environment to avoid races
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("WHATSAPP_TOKEN", "dummy_token");
        env::set_var("BASE_DELAY_MS", "500");
        env::set_var("INBOUND_GATE_MODE", "active_window");

        let settings = Settings::new()?;
        assert_eq!(settings.whatsapp_token, "dummy_token");
        assert_eq!(settings.base_delay_ms, 500);
        assert_eq!(settings.max_backoff_ms, DEFAULT_MAX_BACKOFF_MS);
        assert_eq!(settings.whatsapp_version, DEFAULT_WHATSAPP_VERSION);
        assert_eq!(settings.gate_mode(), GateMode::ActiveWindow);
        assert_eq!(settings.pacing().base_delay, Duration::from_millis(500));

        env::remove_var("BASE_DELAY_MS");
        env::remove_var("INBOUND_GATE_MODE");

        // Empty values are ignored
        env::set_var("WHATSAPP_VERSION", "");
        let settings = Settings::new()?;
        assert_eq!(settings.whatsapp_version, DEFAULT_WHATSAPP_VERSION);
        assert_eq!(settings.gate_mode(), GateMode::BackoffPresence);

        env::remove_var("WHATSAPP_VERSION");
        env::remove_var("WHATSAPP_TOKEN");
        Ok(())
    }

    #[test]
    fn test_rate_limit_code_parsing() {
        let mut settings = bare_settings();
        assert_eq!(settings.rate_limit_codes(), vec![130_429, 131_056]);

        settings.rate_limit_error_codes_str = Some("131056; 80007,4".to_string());
        assert_eq!(settings.rate_limit_codes(), vec![131_056, 80_007, 4]);

        // Nothing parseable keeps the defaults
        settings.rate_limit_error_codes_str = Some("abc, ,".to_string());
        assert_eq!(settings.rate_limit_codes(), DEFAULT_RATE_LIMIT_ERROR_CODES);
    }

    #[test]
    fn test_unknown_gate_mode_falls_back() {
        let mut settings = bare_settings();
        settings.inbound_gate_mode_str = Some("sometimes".to_string());
        assert_eq!(settings.gate_mode(), GateMode::BackoffPresence);
    }

    #[test]
    fn test_pacing_defaults_match_settings_defaults() {
        assert_eq!(bare_settings().pacing(), PacingConfig::default());
    }
}
