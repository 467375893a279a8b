//! Cloud API `/messages` request bodies.

use super::message::{OutboundMessage, ReplyButton};
use serde::Serialize;

/// JSON body posted to `/{phone_number_id}/messages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    messaging_product: &'static str,
    recipient_type: &'static str,
    /// Recipient phone number
    pub to: String,
    /// Type-specific content
    #[serde(flatten)]
    pub content: WireContent,
}

/// Type-tagged message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContent {
    /// `type: text`
    Text {
        /// Text payload
        text: TextContent,
    },
    /// `type: image`
    Image {
        /// Link payload
        image: MediaLink,
    },
    /// `type: audio`
    Audio {
        /// Link payload
        audio: MediaLink,
    },
    /// `type: interactive`
    Interactive {
        /// Interactive payload
        interactive: Interactive,
    },
}

/// Text payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    /// Render link previews
    pub preview_url: bool,
    /// Message text
    pub body: String,
}

/// Media sent by link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaLink {
    /// Public URL
    pub link: String,
}

/// Interactive reply-button message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interactive {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Prompt shown above the buttons
    pub body: InteractiveBody,
    /// Buttons
    pub action: InteractiveAction,
}

/// Interactive prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractiveBody {
    /// Prompt text
    pub text: String,
}

/// Interactive action block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractiveAction {
    /// Reply buttons
    pub buttons: Vec<WireButton>,
}

/// A reply button in Cloud API shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireButton {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Button id and title
    pub reply: ReplyButton,
}

impl WireMessage {
    /// Render `message` for `to`.
    ///
    /// `previous` is the message right before this one in the batch; a buttons
    /// message uses its text as the prompt, or `default_prompt` when there is
    /// none. Returns `None` for messages that are never sent on their own.
    #[must_use]
    pub fn render(
        to: &str,
        message: &OutboundMessage,
        previous: Option<&OutboundMessage>,
        default_prompt: &str,
    ) -> Option<Self> {
        let content = match message {
            OutboundMessage::Text { value } => WireContent::Text {
                text: TextContent {
                    preview_url: true,
                    body: value.clone(),
                },
            },
            OutboundMessage::Image { value } => WireContent::Image {
                image: MediaLink {
                    link: value.clone(),
                },
            },
            OutboundMessage::Audio { value } => WireContent::Audio {
                audio: MediaLink {
                    link: value.clone(),
                },
            },
            OutboundMessage::Buttons { buttons } => {
                let prompt = previous
                    .and_then(OutboundMessage::prompt_text)
                    .filter(|text| !text.is_empty())
                    .unwrap_or(default_prompt);
                WireContent::Interactive {
                    interactive: Interactive {
                        kind: "button",
                        body: InteractiveBody {
                            text: prompt.to_string(),
                        },
                        action: InteractiveAction {
                            buttons: buttons
                                .iter()
                                .map(|reply| WireButton {
                                    kind: "reply",
                                    reply: reply.clone(),
                                })
                                .collect(),
                        },
                    },
                }
            }
            OutboundMessage::Body { .. } | OutboundMessage::Unsupported => return None,
        };

        Some(Self {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: to.to_string(),
            content,
        })
    }

    /// Prompt text of an interactive message
    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        match &self.content {
            WireContent::Interactive { interactive } => Some(&interactive.body.text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFAULT: &str = "Make your choice";

    fn buttons() -> OutboundMessage {
        OutboundMessage::buttons(vec![
            ReplyButton::new("path-a", "Yes"),
            ReplyButton::new("intent_no", "No"),
        ])
    }

    #[test]
    fn test_text_wire_shape() -> Result<(), serde_json::Error> {
        let wire = WireMessage::render("4915100000000", &OutboundMessage::text("Hello"), None, DEFAULT);
        let Some(wire) = wire else {
            panic!("text must render");
        };
        assert_eq!(
            serde_json::to_value(&wire)?,
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "4915100000000",
                "type": "text",
                "text": {"preview_url": true, "body": "Hello"}
            })
        );
        Ok(())
    }

    #[test]
    fn test_image_wire_shape() -> Result<(), serde_json::Error> {
        let Some(wire) = WireMessage::render("1", &OutboundMessage::image("https://x/y.png"), None, DEFAULT) else {
            panic!("image must render");
        };
        let value = serde_json::to_value(&wire)?;
        assert_eq!(value["type"], "image");
        assert_eq!(value["image"]["link"], "https://x/y.png");
        Ok(())
    }

    #[test]
    fn test_buttons_use_preceding_text_as_prompt() -> Result<(), serde_json::Error> {
        let previous = OutboundMessage::text("Pick one");
        let Some(wire) = WireMessage::render("1", &buttons(), Some(&previous), DEFAULT) else {
            panic!("buttons must render");
        };
        assert_eq!(wire.prompt(), Some("Pick one"));

        let value = serde_json::to_value(&wire)?;
        assert_eq!(value["type"], "interactive");
        assert_eq!(value["interactive"]["type"], "button");
        assert_eq!(
            value["interactive"]["action"]["buttons"][0],
            json!({"type": "reply", "reply": {"id": "path-a", "title": "Yes"}})
        );
        Ok(())
    }

    #[test]
    fn test_buttons_without_preceding_text_use_default() {
        let rendered = WireMessage::render("1", &buttons(), None, DEFAULT);
        assert_eq!(rendered.as_ref().and_then(WireMessage::prompt), Some(DEFAULT));

        let image = OutboundMessage::image("https://x/y.png");
        let rendered = WireMessage::render("1", &buttons(), Some(&image), DEFAULT);
        assert_eq!(rendered.as_ref().and_then(WireMessage::prompt), Some(DEFAULT));
    }

    #[test]
    fn test_body_and_unsupported_are_not_rendered() {
        assert!(WireMessage::render("1", &OutboundMessage::body("p"), None, DEFAULT).is_none());
        assert!(WireMessage::render("1", &OutboundMessage::Unsupported, None, DEFAULT).is_none());
    }
}
