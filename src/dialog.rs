//! Dialog engine turn translation
//!
//! Turns the ordered directives of one dialog-engine response into the batch
//! the pacer sends, plus the turn metadata (no-reply timeout, session end).
//! Directive payloads are expected as plain text; rich-text rendering happens
//! upstream.

use crate::channel::message::{OutboundMessage, ReplyButton};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// WhatsApp limit on reply buttons per message
pub const MAX_REPLY_BUTTONS: usize = 3;
/// WhatsApp limit on reply button titles, in characters
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;

/// One directive of a dialog-engine response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Directive {
    /// `text`, `speak`, `visual`, `choice`, `no-reply`, `end`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload
    #[serde(default)]
    pub payload: Value,
}

impl Directive {
    /// Directive with a JSON payload
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextPayload {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SpeakPayload {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    src: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisualPayload {
    image: String,
}

#[derive(Debug, Deserialize)]
struct ChoicePayload {
    #[serde(default)]
    buttons: Vec<ChoiceButton>,
}

#[derive(Debug, Deserialize)]
struct ChoiceButton {
    request: ChoiceRequest,
}

#[derive(Debug, Deserialize)]
struct ChoiceRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: ChoiceRequestPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceRequestPayload {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    intent: Option<IntentRef>,
    #[serde(default)]
    actions: Vec<ChoiceAction>,
}

#[derive(Debug, Deserialize)]
struct IntentRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChoiceAction {
    #[serde(default)]
    payload: Option<ActionPayload>,
}

#[derive(Debug, Deserialize)]
struct ActionPayload {
    #[serde(default)]
    url: Option<String>,
}

/// Batch and metadata derived from one dialog turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnPlan {
    /// Messages to send, in order
    pub messages: Vec<OutboundMessage>,
    /// Wait this long for user input before reporting a no-reply
    pub no_reply_timeout: Option<Duration>,
    /// The dialog reached its end; start a new session next time
    pub ends_session: bool,
}

/// Translate one dialog turn.
///
/// Text directly followed by a choice becomes the choice's prompt body.
/// Unknown or malformed directives are skipped.
#[must_use]
pub fn plan_turn(directives: &[Directive]) -> TurnPlan {
    let ends_session = directives.iter().any(|d| d.kind == "end");
    let mut plan = TurnPlan {
        ends_session,
        ..TurnPlan::default()
    };

    for (i, directive) in directives.iter().enumerate() {
        let next_is_choice = directives.get(i + 1).is_some_and(|d| d.kind == "choice");
        match directive.kind.as_str() {
            "text" => {
                if let Some(payload) = parse::<TextPayload>(directive) {
                    plan.messages.push(text_or_body(payload.message, next_is_choice));
                }
            }
            "speak" => {
                if let Some(payload) = parse::<SpeakPayload>(directive) {
                    plan.messages.push(speak_message(payload, next_is_choice));
                }
            }
            "visual" => {
                if let Some(payload) = parse::<VisualPayload>(directive) {
                    plan.messages.push(OutboundMessage::image(payload.image));
                }
            }
            "choice" => {
                if let Some(payload) = parse::<ChoicePayload>(directive) {
                    plan.messages.push(choice_message(payload));
                }
            }
            "no-reply" if !ends_session => {
                plan.no_reply_timeout = no_reply_timeout(&directive.payload);
            }
            "no-reply" | "end" => {}
            other => debug!("Ignoring dialog directive '{other}'"),
        }
    }

    plan
}

fn parse<T: serde::de::DeserializeOwned>(directive: &Directive) -> Option<T> {
    serde_json::from_value(directive.payload.clone())
        .map_err(|e| warn!("Malformed '{}' directive: {e}", directive.kind))
        .ok()
}

fn text_or_body(text: String, next_is_choice: bool) -> OutboundMessage {
    if next_is_choice {
        OutboundMessage::body(text)
    } else {
        OutboundMessage::text(text)
    }
}

fn speak_message(payload: SpeakPayload, next_is_choice: bool) -> OutboundMessage {
    match (payload.kind.as_deref(), payload.src) {
        (Some("audio"), Some(src)) => OutboundMessage::audio(src),
        _ => text_or_body(payload.message, next_is_choice),
    }
}

fn choice_message(payload: ChoicePayload) -> OutboundMessage {
    let buttons = payload
        .buttons
        .into_iter()
        .filter_map(|button| {
            let request = button.request;
            // Link buttons cannot be expressed as reply buttons
            let has_link = request
                .payload
                .actions
                .first()
                .and_then(|a| a.payload.as_ref())
                .and_then(|p| p.url.as_ref())
                .is_some();
            if has_link {
                return None;
            }

            let id = if request.kind.contains("path-") {
                request.kind
            } else {
                request.payload.intent.map(|i| i.name)?
            };
            let title = truncate_title(request.payload.label.as_deref().unwrap_or_default());
            Some(ReplyButton::new(id, title))
        })
        .take(MAX_REPLY_BUTTONS)
        .collect();

    OutboundMessage::buttons(buttons)
}

fn no_reply_timeout(payload: &Value) -> Option<Duration> {
    let raw = payload.get("timeout")?;
    let secs = raw
        .as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse::<f64>().ok()))?;
    (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Shortens a button title to the WhatsApp limit, marking the cut with `…`
#[must_use]
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() > MAX_BUTTON_TITLE_CHARS {
        let mut truncated: String = title.chars().take(MAX_BUTTON_TITLE_CHARS - 1).collect();
        truncated.push('…');
        truncated
    } else {
        title.to_string()
    }
}
