//! Forwards warn/error log events (or anything tagged `alert = true`) to a
//! chat webhook so on-call sees billing failures without tailing logs.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};
use url::Url;

use super::config::ServiceContext;

const ALERT_QUEUE_CAPACITY: usize = 256;
const MAX_MESSAGE_CHARS: usize = 2000;
const MAX_FIELD_CHARS: usize = 300;
const REDACTED: &str = "[redacted]";
const SENSITIVE_MARKERS: [&str; 7] = [
    "secret",
    "token",
    "signature",
    "key",
    "password",
    "authorization",
    "webhook",
];

/// Fields that identify the affected customer; rendered first.
const LEADING_FIELDS: [&str; 4] = ["account_id", "subscription_id", "event_id", "event_type"];

#[derive(Debug, Clone)]
pub(crate) struct AlertEvent {
    pub(crate) level: Level,
    pub(crate) occurred_at: DateTime<Utc>,
    pub(crate) service: ServiceContext,
    pub(crate) target: String,
    pub(crate) message: String,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) spans: Vec<String>,
}

#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, alert: &AlertEvent) -> Result<()>;
}

/// Hands events to a background task; a full queue drops the alert rather
/// than blocking the request that logged it.
#[derive(Clone)]
pub(crate) struct AlertDispatcher {
    sender: mpsc::Sender<AlertEvent>,
}

impl AlertDispatcher {
    pub(crate) fn spawn(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AlertEvent>(ALERT_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(alert) = receiver.recv().await {
                for sink in &sinks {
                    // Reported on stderr; a tracing call here would loop back into the layer.
                    if let Err(err) = sink.deliver(&alert).await {
                        eprintln!("alert sink {} failed: {err:#}", sink.name());
                    }
                }
            }
        });

        Self { sender }
    }

    fn dispatch(&self, alert: AlertEvent) {
        if self.sender.try_send(alert).is_err() {
            eprintln!("alert queue full or closed; alert dropped");
        }
    }
}

pub(crate) struct ChatWebhookSink {
    client: Client,
    webhook_url: Url,
}

impl ChatWebhookSink {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build alert webhook client")?;

        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl AlertSink for ChatWebhookSink {
    fn name(&self) -> &'static str {
        "chat_webhook"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": render_alert(alert) }))
            .send()
            .await
            // reqwest errors carry the URL, which embeds the webhook token.
            .map_err(|err| anyhow::anyhow!("alert webhook request failed: {}", err.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("alert webhook responded with status {status}");
        }

        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct AlertLayer {
    dispatcher: AlertDispatcher,
    service: ServiceContext,
    min_level: Level,
}

impl AlertLayer {
    pub(crate) fn new(dispatcher: AlertDispatcher, service: ServiceContext, min_level: Level) -> Self {
        Self {
            dispatcher,
            service,
            min_level,
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: BTreeMap<String, String>,
    alert_flag: bool,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.fields.insert(name.to_string(), redact(name, value));
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "alert" {
            self.alert_flag = value;
            return;
        }
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        // Level ordering in tracing is reversed: ERROR < WARN.
        let severe_enough = *metadata.level() <= self.min_level;
        if !severe_enough && !collector.alert_flag {
            return;
        }

        let spans = ctx
            .event_scope(event)
            .map(|scope| scope.from_root().map(|span| span.name().to_string()).collect())
            .unwrap_or_default();

        self.dispatcher.dispatch(AlertEvent {
            level: *metadata.level(),
            occurred_at: Utc::now(),
            service: self.service.clone(),
            target: metadata.target().to_string(),
            message: collector.message.unwrap_or_default(),
            fields: collector.fields,
            spans,
        });
    }
}

fn is_sensitive(field_name: &str) -> bool {
    let lowered = field_name.to_ascii_lowercase();
    SENSITIVE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn redact(field_name: &str, value: String) -> String {
    if is_sensitive(field_name) {
        REDACTED.to_string()
    } else {
        truncate(&value, MAX_FIELD_CHARS)
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

pub(crate) fn render_alert(alert: &AlertEvent) -> String {
    let mut lines = vec![
        format!(
            "**{}** `{}` ({}/{})",
            alert.level, alert.service.service_name, alert.service.environment, alert.service.component
        ),
        format!("{} at {}", alert.target, alert.occurred_at.to_rfc3339()),
    ];

    if !alert.message.is_empty() {
        lines.push(format!("> {}", alert.message));
    }

    for name in LEADING_FIELDS {
        if let Some(value) = alert.fields.get(name) {
            lines.push(format!("{name}: `{value}`"));
        }
    }
    for (name, value) in &alert.fields {
        if !LEADING_FIELDS.contains(&name.as_str()) {
            lines.push(format!("{name}: `{value}`"));
        }
    }

    if !alert.spans.is_empty() {
        lines.push(format!("spans: {}", alert.spans.join(" > ")));
    }

    truncate(&lines.join("\n"), MAX_MESSAGE_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(fields: &[(&str, &str)]) -> AlertEvent {
        AlertEvent {
            level: Level::ERROR,
            occurred_at: Utc::now(),
            service: ServiceContext {
                service_name: "billing".to_string(),
                environment: "test".to_string(),
                component: "backend".to_string(),
            },
            target: "backend::usecases::billing_webhooks".to_string(),
            message: "webhook: malformed event".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            spans: vec!["http_request".to_string()],
        }
    }

    #[test]
    fn sensitive_fields_are_redacted() {
        assert_eq!(redact("stripe_signature", "t=1,v1=abc".to_string()), REDACTED);
        assert_eq!(redact("api_key", "sk_live".to_string()), REDACTED);
        assert_eq!(redact("Authorization", "Bearer x".to_string()), REDACTED);
        assert_eq!(redact("account_id", "acc_1".to_string()), "acc_1");
    }

    #[test]
    fn long_values_are_truncated() {
        let value = "x".repeat(MAX_FIELD_CHARS + 50);

        let redacted = redact("detail", value);

        assert_eq!(redacted.chars().count(), MAX_FIELD_CHARS);
        assert!(redacted.ends_with('…'));
    }

    #[test]
    fn rendered_alert_leads_with_identifiers() {
        let rendered = render_alert(&alert(&[
            ("db_error", "timeout"),
            ("account_id", "acc_1"),
            ("event_id", "evt_1"),
        ]));

        let account_pos = rendered.find("account_id").unwrap();
        let error_pos = rendered.find("db_error").unwrap();
        assert!(account_pos < error_pos);
        assert!(rendered.contains("> webhook: malformed event"));
        assert!(rendered.contains("spans: http_request"));
    }

    #[test]
    fn rendered_alert_fits_chat_limit() {
        let long = "y".repeat(MAX_FIELD_CHARS);
        let fields: Vec<(String, String)> = (0..20).map(|i| (format!("f{i}"), long.clone())).collect();
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let rendered = render_alert(&alert(&fields));

        assert_eq!(rendered.chars().count(), MAX_MESSAGE_CHARS);
    }
}
