//! Outbound messages produced by one dialog turn.

use serde::{Deserialize, Serialize};

/// A quick-reply button shown under an interactive message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    /// Payload returned by WhatsApp when the user taps the button
    pub id: String,
    /// Visible label
    pub title: String,
}

impl ReplyButton {
    /// Create a new button
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// One message addressed to a recipient.
///
/// A `Buttons` message takes its prompt from the immediately preceding
/// `Text` or `Body` message. A `Body` is never sent on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Plain text
    Text {
        /// Message text
        value: String,
    },
    /// Prompt text for the buttons message that follows it
    Body {
        /// Prompt text
        value: String,
    },
    /// Image by URL
    Image {
        /// Public media URL
        value: String,
    },
    /// Audio by URL
    Audio {
        /// Public media URL
        value: String,
    },
    /// Reply buttons
    Buttons {
        /// Buttons in display order
        buttons: Vec<ReplyButton>,
    },
    /// Any tag this bridge does not know how to send
    #[serde(other)]
    Unsupported,
}

impl OutboundMessage {
    /// Text message
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    /// Prompt-only body
    #[must_use]
    pub fn body(value: impl Into<String>) -> Self {
        Self::Body {
            value: value.into(),
        }
    }

    /// Image message
    #[must_use]
    pub fn image(url: impl Into<String>) -> Self {
        Self::Image { value: url.into() }
    }

    /// Audio message
    #[must_use]
    pub fn audio(url: impl Into<String>) -> Self {
        Self::Audio { value: url.into() }
    }

    /// Buttons message
    #[must_use]
    pub const fn buttons(buttons: Vec<ReplyButton>) -> Self {
        Self::Buttons { buttons }
    }

    /// Short name used in logs and reports
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Body { .. } => "body",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::Buttons { .. } => "buttons",
            Self::Unsupported => "unsupported",
        }
    }

    /// URL of the media asset, for image and audio messages
    #[must_use]
    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Image { value } | Self::Audio { value } => Some(value),
            _ => None,
        }
    }

    /// Text usable as the prompt of a following buttons message
    #[must_use]
    pub fn prompt_text(&self) -> Option<&str> {
        match self {
            Self::Text { value } | Self::Body { value } => Some(value),
            _ => None,
        }
    }
}
