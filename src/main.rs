use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use wa_dialog_bridge::bridge::DialogBridge;
use wa_dialog_bridge::channel::graph::GraphClient;
use wa_dialog_bridge::config::Settings;
use wa_dialog_bridge::dialog::Directive;

const USAGE: &str = "usage: wa-dialog-bridge <recipient> <phone-number-id> <turn.json>";

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    bearer: Regex,
    access_token: Regex,
    graph_token: Regex,
    phone: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bearer: Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._-]+")?,
            access_token: Regex::new(r"(access_token=)[^\s&]+")?,
            graph_token: Regex::new(r"EAA[A-Za-z0-9]{20,}")?,
            // Recipients as they appear in log lines ("to", "from", "for") or
            // in `+` form; the last four digits stay visible for correlation
            phone: Regex::new(r"(?i)(\b(?:to|from|for)\s+\+?|\+)\d{6,11}(\d{4})\b")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self.bearer.replace_all(input, "$1[MASKED]");
        let output = self.access_token.replace_all(&output, "$1[MASKED]");
        let output = self.graph_token.replace_all(&output, "[WHATSAPP_TOKEN]");
        self.phone.replace_all(&output, "${1}***$2").into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may differ in size
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Before logging, so nothing is written unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [recipient, channel_id, turn_path] = args.as_slice() else {
        bail!(USAGE);
    };

    let settings = init_settings();
    let directives = load_turn(turn_path)?;

    let client = Arc::new(GraphClient::new(&settings));
    let pacing = settings.pacing();
    info!(
        "Pacing: base {}ms, max backoff {}ms, gate {:?}",
        pacing.base_delay.as_millis(),
        pacing.max_backoff.as_millis(),
        pacing.gate_mode
    );
    let bridge = DialogBridge::new(client, &pacing);

    let outcome = bridge.deliver_turn(recipient, channel_id, &directives).await;
    if !outcome.report.is_complete() {
        warn!(
            "{} message(s) to {recipient} were not delivered",
            outcome.report.failed().len()
        );
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_turn(path: &str) -> Result<Vec<Directive>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing dialog turn in {path}"))
}
