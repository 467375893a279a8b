use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use wa_dialog_bridge::bridge::DialogBridge;
use wa_dialog_bridge::channel::message::OutboundMessage;
use wa_dialog_bridge::channel::wire::{WireContent, WireMessage};
use wa_dialog_bridge::channel::{DeliveryClient, DeliveryError};
use wa_dialog_bridge::config::PacingConfig;
use wa_dialog_bridge::dialog::Directive;
use wa_dialog_bridge::pacing::{BackoffLedger, GateMode, MessagePacer, MessageStatus};

const RECIPIENT: &str = "4915100000001";
const CHANNEL: &str = "109876543210";

/// Replays queued send results, then succeeds; records every send
struct ScriptedClient {
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    sent: Mutex<Vec<(Duration, String)>>,
    started: Instant,
}

impl ScriptedClient {
    fn new(script: Vec<Result<(), DeliveryError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    fn sent(&self) -> Vec<(Duration, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, body)| body).collect()
    }
}

#[async_trait]
impl DeliveryClient for ScriptedClient {
    async fn send(&self, _channel_id: &str, message: &WireMessage) -> Result<(), DeliveryError> {
        let body = match &message.content {
            WireContent::Text { text } => text.body.clone(),
            WireContent::Image { image } => image.link.clone(),
            WireContent::Audio { audio } => audio.link.clone(),
            WireContent::Interactive { interactive } => interactive.body.text.clone(),
        };
        let at = self.started.elapsed();
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((at, body));
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(Ok(()))
    }

    async fn probe_size(&self, _url: &str) -> Result<Option<u64>, DeliveryError> {
        Ok(Some(100 * 1024))
    }
}

fn rate_limited() -> DeliveryError {
    DeliveryError::RateLimited {
        code: Some(131_056),
        message: "(#131056) (Business Account, Consumer Account) pair rate limit hit".to_string(),
    }
}

fn text(message: &str) -> Directive {
    Directive::new("text", json!({ "message": message }))
}

#[tokio::test(start_paused = true)]
async fn turn_is_paced_and_retried_after_rate_limits() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(()),
        Err(rate_limited()),
        Err(rate_limited()),
    ]));
    let bridge = DialogBridge::new(client.clone(), &PacingConfig::default());

    let outcome = bridge
        .deliver_turn(
            RECIPIENT,
            CHANNEL,
            &[text("Welcome back"), text("What can I do for you?")],
        )
        .await;

    assert!(outcome.report.is_complete());
    assert_eq!(
        outcome.report.outcomes[1].status,
        MessageStatus::Delivered { attempts: 3 }
    );
    let times: Vec<Duration> = client.sent().into_iter().map(|(at, _)| at).collect();
    assert_eq!(
        times,
        vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(12),
        ]
    );
    assert_eq!(bridge.ledger().backoff_for(RECIPIENT).await, None);
}

#[tokio::test(start_paused = true)]
async fn inbound_dropped_while_backing_off() {
    let client = Arc::new(ScriptedClient::new(vec![Ok(()), Err(rate_limited())]));
    let bridge = DialogBridge::new(client.clone(), &PacingConfig::default());
    assert!(bridge.accept_inbound(RECIPIENT).await);

    let sender = bridge.clone();
    let turn = tokio::spawn(async move {
        sender
            .deliver_turn(RECIPIENT, CHANNEL, &[text("first"), text("second")])
            .await
    });

    // The second message was rate limited at 2s and retries at 4s
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!bridge.accept_inbound(RECIPIENT).await);
    assert!(bridge.accept_inbound("4915100000002").await);

    let outcome = turn.await.expect("turn task panicked");
    assert_eq!(outcome.report.delivered(), 2);
    assert!(bridge.accept_inbound(RECIPIENT).await);
}

#[tokio::test(start_paused = true)]
async fn inbound_accepted_again_after_retries_give_up() {
    let client = Arc::new(ScriptedClient::new(
        (0..4).map(|_| Err(rate_limited())).collect(),
    ));
    let config = PacingConfig {
        max_rate_limit_retries: 3,
        ..PacingConfig::default()
    };
    let bridge = DialogBridge::new(client, &config);

    let outcome = bridge
        .deliver_turn(RECIPIENT, CHANNEL, &[text("are you there?")])
        .await;
    assert!(matches!(
        outcome.report.outcomes[0].status,
        MessageStatus::GaveUp { attempts: 4, .. }
    ));
    assert!(!bridge.accept_inbound(RECIPIENT).await);

    // The final 60s backoff runs out without another send
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(bridge.accept_inbound(RECIPIENT).await);
}

#[tokio::test(start_paused = true)]
async fn active_window_gate_follows_recent_sends() {
    let client = Arc::new(ScriptedClient::new(Vec::new()));
    let config = PacingConfig {
        gate_mode: GateMode::ActiveWindow,
        ..PacingConfig::default()
    };
    let bridge = DialogBridge::new(client, &config);

    bridge
        .deliver_turn(RECIPIENT, CHANNEL, &[text("hello")])
        .await;
    assert!(!bridge.accept_inbound(RECIPIENT).await);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(bridge.accept_inbound(RECIPIENT).await);
}

#[tokio::test(start_paused = true)]
async fn batches_for_one_recipient_do_not_interleave() {
    let client = Arc::new(ScriptedClient::new(Vec::new()));
    let config = PacingConfig::default();
    let pacer = MessagePacer::new(BackoffLedger::new(&config), client.clone(), &config);

    let first = pacer.clone();
    let a = tokio::spawn(async move {
        first
            .send_batch(
                RECIPIENT,
                CHANNEL,
                &[OutboundMessage::text("a1"), OutboundMessage::text("a2")],
            )
            .await
    });
    let second = pacer.clone();
    let b = tokio::spawn(async move {
        second
            .send_batch(
                RECIPIENT,
                CHANNEL,
                &[OutboundMessage::text("b1"), OutboundMessage::text("b2")],
            )
            .await
    });
    let (a, b) = tokio::join!(a, b);
    assert!(a.expect("batch a panicked").is_complete());
    assert!(b.expect("batch b panicked").is_complete());

    let bodies = client.bodies();
    assert!(
        bodies == ["a1", "a2", "b1", "b2"] || bodies == ["b1", "b2", "a1", "a2"],
        "batches interleaved: {bodies:?}"
    );
    // Spacing holds across the batch boundary too
    let times: Vec<Duration> = client.sent().into_iter().map(|(at, _)| at).collect();
    assert!(times.windows(2).all(|w| w[1] - w[0] >= Duration::from_secs(2)));
}

#[tokio::test(start_paused = true)]
async fn batches_for_different_recipients_run_in_parallel() {
    let client = Arc::new(ScriptedClient::new(Vec::new()));
    let bridge = DialogBridge::new(client.clone(), &PacingConfig::default());

    let started = Instant::now();
    let turn = [text("one"), text("two")];
    let (x, y) = tokio::join!(
        bridge.deliver_turn("4915100000001", CHANNEL, &turn),
        bridge.deliver_turn("4915100000002", CHANNEL, &turn),
    );

    assert_eq!(x.report.delivered() + y.report.delivered(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn empty_turn_sends_nothing() {
    let client = Arc::new(ScriptedClient::new(Vec::new()));
    let bridge = DialogBridge::new(client.clone(), &PacingConfig::default());

    let outcome = bridge
        .deliver_turn(
            RECIPIENT,
            CHANNEL,
            &[Directive::new("end", serde_json::Value::Null)],
        )
        .await;

    assert!(outcome.report.outcomes.is_empty());
    assert!(outcome.ends_session);
    assert!(client.sent().is_empty());
    assert!(bridge.ledger().state_of(RECIPIENT).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn choice_turn_sends_buttons_with_prompt() {
    let client = Arc::new(ScriptedClient::new(Vec::new()));
    let bridge = DialogBridge::new(client.clone(), &PacingConfig::default());

    let outcome = bridge
        .deliver_turn(
            RECIPIENT,
            CHANNEL,
            &[
                text("Pick a slot"),
                Directive::new(
                    "choice",
                    json!({"buttons": [
                        {"request": {"type": "path-am", "payload": {"label": "Morning"}}},
                        {"request": {"type": "path-pm", "payload": {"label": "Afternoon"}}}
                    ]}),
                ),
                Directive::new("no-reply", json!({"timeout": 60})),
            ],
        )
        .await;

    assert_eq!(outcome.report.outcomes[0].status, MessageStatus::Skipped);
    assert_eq!(client.bodies(), vec!["Pick a slot".to_string()]);
    assert_eq!(outcome.no_reply_timeout_secs, Some(60.0));
}
