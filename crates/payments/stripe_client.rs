use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;
use url::Url;

use crate::domain::value_objects::{
    billing_intents::BillingPeriod, enums::checkout_modes::CheckoutMode,
};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub webhook_tolerance_secs: i64,
}

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    api_base: Url,
    secret_key: String,
    webhook_secret: String,
    webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub mode: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub billing_cycle_anchor: Option<i64>,
    pub pause_collection: Option<StripePauseCollection>,
    #[serde(default)]
    pub items: StripeSubscriptionItems,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePauseCollection {
    pub behavior: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StripeSubscriptionItems {
    #[serde(default)]
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: Option<String>,
    pub price: Option<StripePrice>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

impl StripeSubscription {
    /// Returns the subscription period start timestamp, falling back to the first item
    /// or the billing cycle anchor when the top-level field is absent.
    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| {
                self.items
                    .data
                    .first()
                    .and_then(|item| item.current_period_start)
            })
            .or(self.billing_cycle_anchor)
    }

    /// Returns the subscription period end timestamp, falling back to the first item when needed.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end.or_else(|| {
            self.items
                .data
                .first()
                .and_then(|item| item.current_period_end)
        })
    }

    pub fn period(&self) -> Option<BillingPeriod> {
        let start = unix_to_datetime(self.period_start()?)?;
        let end = unix_to_datetime(self.period_end()?)?;
        BillingPeriod::new(start, end)
    }

    pub fn first_item_id(&self) -> Option<&str> {
        self.items.data.first().and_then(|item| item.id.as_deref())
    }

    pub fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }
}

pub fn unix_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub mode: CheckoutMode,
    /// Required for subscription mode, ignored for setup mode.
    pub price_id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionModification {
    PauseCollection { behavior: String },
    ResumeCollection,
    SwapPrice { item_id: String, price_id: String },
    CancelAtPeriodEnd(bool),
}

impl SubscriptionModification {
    fn form_fields(&self) -> Vec<(String, String)> {
        match self {
            SubscriptionModification::PauseCollection { behavior } => {
                vec![("pause_collection[behavior]".to_string(), behavior.clone())]
            }
            // An empty value unsets pause_collection.
            SubscriptionModification::ResumeCollection => {
                vec![("pause_collection".to_string(), String::new())]
            }
            SubscriptionModification::SwapPrice { item_id, price_id } => vec![
                ("items[0][id]".to_string(), item_id.clone()),
                ("items[0][price]".to_string(), price_id.clone()),
                ("proration_behavior".to_string(), "create_prorations".to_string()),
            ],
            SubscriptionModification::CancelAtPeriodEnd(flag) => {
                vec![("cancel_at_period_end".to_string(), flag.to_string())]
            }
        }
    }
}

impl CheckoutSessionRequest {
    fn form_fields(&self) -> Result<Vec<(String, String)>> {
        let mut body: Vec<(String, String)> = vec![
            ("mode".to_string(), self.mode.to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];

        match self.mode {
            CheckoutMode::Subscription => {
                let price_id = self
                    .price_id
                    .as_ref()
                    .context("subscription checkout requires a price id")?;
                body.push(("line_items[0][price]".to_string(), price_id.clone()));
                body.push(("line_items[0][quantity]".to_string(), "1".to_string()));
            }
            CheckoutMode::Setup => {
                body.push((
                    "payment_method_types[0]".to_string(),
                    "card".to_string(),
                ));
            }
        }

        match (&self.customer_id, &self.customer_email) {
            (Some(customer), _) => body.push(("customer".to_string(), customer.clone())),
            (None, Some(email)) => body.push(("customer_email".to_string(), email.clone())),
            (None, None) => {}
        }

        let mut metadata = self.metadata.iter().collect::<Vec<_>>();
        metadata.sort();
        for (key, value) in metadata {
            body.push((format!("metadata[{key}]"), value.clone()));
            if self.mode == CheckoutMode::Subscription {
                body.push((format!("subscription_data[metadata][{key}]"), value.clone()));
            }
        }

        Ok(body)
    }
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let api_base = Url::parse(&config.api_base)
            .with_context(|| format!("invalid stripe api base {}", config.api_base))?;

        Ok(Self {
            http: reqwest::Client::new(),
            api_base,
            secret_key: config.secret_key,
            webhook_secret: config.webhook_secret,
            webhook_tolerance_secs: config.webhook_tolerance_secs,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(&format!("v1/{path}"))
            .with_context(|| format!("invalid stripe endpoint {path}"))
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .or_else(|| resp.headers().get("stripe-request-id"))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .ok();

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.as_deref()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.as_deref()),
            stripe_error_param = ?details.as_ref().and_then(|d| d.param.as_deref()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.as_deref()),
            context = %context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    /// Creates a Checkout Session. https://stripe.com/docs/api/checkout/sessions/create
    pub async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession> {
        let body = request.form_fields()?;

        let resp = self
            .http
            .post(self.endpoint("checkout/sessions")?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create checkout session").await?;

        let session: StripeCheckoutSession = resp.json().await?;
        let url = session
            .url
            .ok_or_else(|| anyhow::anyhow!("Stripe Checkout session URL is missing"))?;

        Ok(CreatedCheckoutSession {
            id: session.id,
            url,
        })
    }

    pub async fn retrieve_checkout_session(&self, session_id: &str) -> Result<StripeCheckoutSession> {
        let resp = self
            .http
            .get(self.endpoint(&format!("checkout/sessions/{session_id}"))?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve checkout session").await?;

        Ok(resp.json().await?)
    }

    pub async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        // https://stripe.com/docs/api/subscriptions/retrieve
        let resp = self
            .http
            .get(self.endpoint(&format!("subscriptions/{subscription_id}"))?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve subscription").await?;

        Ok(resp.json().await?)
    }

    pub async fn modify_subscription(
        &self,
        subscription_id: &str,
        modification: &SubscriptionModification,
    ) -> Result<StripeSubscription> {
        // https://stripe.com/docs/api/subscriptions/update
        let resp = self
            .http
            .post(self.endpoint(&format!("subscriptions/{subscription_id}"))?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&modification.form_fields())
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "modify subscription").await?;

        Ok(resp.json().await?)
    }

    /// Cancels immediately; the provider follows up with `customer.subscription.deleted`.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.endpoint(&format!("subscriptions/{subscription_id}"))?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        Self::ensure_success(resp, "cancel subscription").await?;

        Ok(())
    }

    /// Verifies the webhook signature. https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        verify_signature(
            &self.webhook_secret,
            payload,
            signature_header,
            Utc::now().timestamp(),
            self.webhook_tolerance_secs,
        )
    }
}

pub fn parse_event(payload: &[u8]) -> Result<StripeEvent> {
    serde_json::from_slice(payload).context("webhook body is not a stripe event")
}

pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<()> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("t=") {
            timestamp = Some(rest);
        } else if let Some(rest) = part.strip_prefix("v1=") {
            signatures.push(rest);
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| anyhow::anyhow!("missing timestamp in stripe-signature"))?;
    if signatures.is_empty() {
        anyhow::bail!("missing v1 in stripe-signature");
    }

    let signed_at: i64 = timestamp
        .parse()
        .context("stripe-signature timestamp is not a number")?;
    if now_unix.abs_diff(signed_at) > tolerance_secs.unsigned_abs() {
        anyhow::bail!("stripe-signature timestamp outside tolerance");
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|signature| {
        hex::decode(signature)
            .map(|provided| mac.clone().verify_slice(&provided).is_ok())
            .unwrap_or(false)
    });

    if !matched {
        anyhow::bail!("invalid webhook signature");
    }

    Ok(())
}
