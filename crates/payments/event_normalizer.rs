//! Maps Stripe webhook payloads onto [`BillingIntent`]s.
//!
//! Parsing is pure: no I/O, no clock. Anything missing a correlation id is
//! rejected as `MalformedEvent` so the engine never acts on partial data.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        billing_errors::BillingError,
        billing_intents::{
            BillingIntent, CustomerAttached, InvoicePayment, InvoiceSnapshot, NormalizedEvent,
            PaymentFailure, PaymentFailureKind, SubscriptionActivated, SubscriptionCanceled,
            SubscriptionUpdated,
        },
        enums::{checkout_modes::CheckoutMode, subscription_statuses::SubscriptionStatus},
    },
    payments::stripe_client::{StripeEvent, StripeSubscription, unix_to_datetime},
};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

pub const METADATA_ACCOUNT_ID: &str = "account_id";
pub const METADATA_PLAN_ID: &str = "plan_id";
pub const METADATA_PRICE_ID: &str = "price_id";
pub const METADATA_OLD_SUBSCRIPTION_ID: &str = "old_subscription_id";

/// A field that Stripe sends either as an id or as the expanded object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    fn into_id(self) -> String {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    mode: Option<String>,
    customer: Option<Expandable>,
    subscription: Option<Expandable>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: Option<String>,
    customer: Option<Expandable>,
    subscription: Option<Expandable>,
    parent: Option<InvoiceParent>,
    billing_reason: Option<String>,
    amount_due: Option<i64>,
    currency: Option<String>,
    status: Option<String>,
    hosted_invoice_url: Option<String>,
    invoice_pdf: Option<String>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    lines: Option<InvoiceLines>,
}

#[derive(Debug, Deserialize)]
struct InvoiceParent {
    subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
struct InvoiceSubscriptionDetails {
    subscription: Option<Expandable>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLines {
    #[serde(default)]
    data: Vec<InvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLine {
    period: Option<LinePeriod>,
}

#[derive(Debug, Deserialize)]
struct LinePeriod {
    start: Option<i64>,
    end: Option<i64>,
}

pub fn normalize_event(event: &StripeEvent) -> Result<NormalizedEvent, BillingError> {
    let intent = match event.type_.as_str() {
        CHECKOUT_SESSION_COMPLETED => match checkout_completed(event)? {
            Some(intent) => intent,
            None => {
                return Ok(NormalizedEvent::Unhandled {
                    event_type: event.type_.clone(),
                });
            }
        },
        INVOICE_PAYMENT_SUCCEEDED => {
            let (payment, _) = invoice_payment(event)?;
            BillingIntent::PaymentSucceeded(payment)
        }
        INVOICE_PAYMENT_FAILED => {
            let (payment, billing_reason) = invoice_payment(event)?;
            BillingIntent::PaymentFailed(PaymentFailure {
                payment,
                kind: PaymentFailureKind::from_billing_reason(billing_reason.as_deref()),
            })
        }
        SUBSCRIPTION_UPDATED => subscription_updated(event)?,
        SUBSCRIPTION_DELETED => subscription_deleted(event)?,
        other => {
            return Ok(NormalizedEvent::Unhandled {
                event_type: other.to_string(),
            });
        }
    };

    Ok(NormalizedEvent::Intent(intent))
}

fn object<T: DeserializeOwned>(event: &StripeEvent) -> Result<T, BillingError> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|err| malformed(event, &format!("unexpected payload shape: {err}")))
}

fn malformed(event: &StripeEvent, reason: &str) -> BillingError {
    BillingError::MalformedEvent(format!(
        "{} ({}): {reason}",
        event.type_,
        event.id.as_deref().unwrap_or("no event id")
    ))
}

fn required<T>(value: Option<T>, event: &StripeEvent, field: &str) -> Result<T, BillingError> {
    value.ok_or_else(|| malformed(event, &format!("missing {field}")))
}

fn metadata_uuid(
    metadata: &HashMap<String, String>,
    key: &str,
    event: &StripeEvent,
) -> Result<Uuid, BillingError> {
    let raw = required(metadata.get(key), event, &format!("metadata.{key}"))?;
    Uuid::parse_str(raw).map_err(|_| malformed(event, &format!("metadata.{key} is not a uuid")))
}

fn checkout_completed(event: &StripeEvent) -> Result<Option<BillingIntent>, BillingError> {
    let session: CheckoutSessionObject = object(event)?;

    let mode = session.mode.as_deref().and_then(CheckoutMode::from_str);
    let Some(mode) = mode else {
        return Ok(None);
    };

    let account_id = match session.metadata.get(METADATA_ACCOUNT_ID) {
        Some(_) => metadata_uuid(&session.metadata, METADATA_ACCOUNT_ID, event)?,
        None => {
            let reference = required(
                session.client_reference_id.as_deref(),
                event,
                "metadata.account_id",
            )?;
            Uuid::parse_str(reference)
                .map_err(|_| malformed(event, "client_reference_id is not a uuid"))?
        }
    };
    let external_customer_id = required(session.customer, event, "customer")?.into_id();

    let intent = match mode {
        CheckoutMode::Setup => BillingIntent::CustomerAttached(CustomerAttached {
            account_id,
            external_customer_id,
        }),
        CheckoutMode::Subscription => {
            let external_subscription_id =
                required(session.subscription, event, "subscription")?.into_id();
            let plan_id = metadata_uuid(&session.metadata, METADATA_PLAN_ID, event)?;
            let replaces_subscription_id = session
                .metadata
                .get(METADATA_OLD_SUBSCRIPTION_ID)
                .filter(|old| !old.is_empty() && **old != external_subscription_id)
                .cloned();

            BillingIntent::SubscriptionActivated(SubscriptionActivated {
                account_id,
                external_customer_id,
                external_subscription_id,
                plan_id,
                status: None,
                period: None,
                replaces_subscription_id,
            })
        }
    };

    Ok(Some(intent))
}

fn invoice_payment(event: &StripeEvent) -> Result<(InvoicePayment, Option<String>), BillingError> {
    let invoice: InvoiceObject = object(event)?;

    let subscription = invoice.subscription.or_else(|| {
        invoice
            .parent
            .and_then(|parent| parent.subscription_details)
            .and_then(|details| details.subscription)
    });
    let external_subscription_id = required(subscription, event, "subscription")?.into_id();
    let external_customer_id = required(invoice.customer, event, "customer")?.into_id();
    let external_invoice_id = required(invoice.id, event, "id")?;

    let line_period = invoice
        .lines
        .and_then(|lines| lines.data.into_iter().next())
        .and_then(|line| line.period);
    let line_start = line_period
        .as_ref()
        .and_then(|period| period.start)
        .and_then(unix_to_datetime);
    let line_end = line_period
        .as_ref()
        .and_then(|period| period.end)
        .and_then(unix_to_datetime);
    let period_end = required(line_end, event, "lines.data[0].period.end")?;

    let amount_due_minor = required(invoice.amount_due, event, "amount_due")?;
    let currency = required(invoice.currency, event, "currency")?;

    let payment = InvoicePayment {
        external_subscription_id,
        external_customer_id,
        period_start: line_start,
        period_end,
        invoice: InvoiceSnapshot {
            external_invoice_id,
            amount_due_minor,
            currency,
            status: invoice.status.unwrap_or_else(|| "unknown".to_string()),
            hosted_invoice_url: invoice.hosted_invoice_url,
            invoice_pdf: invoice.invoice_pdf,
            period_start: invoice.period_start.and_then(unix_to_datetime),
            period_end: invoice.period_end.and_then(unix_to_datetime),
        },
    };

    Ok((payment, invoice.billing_reason))
}

fn subscription_updated(event: &StripeEvent) -> Result<BillingIntent, BillingError> {
    let subscription: StripeSubscription = object(event)?;

    let external_customer_id = required(subscription.customer.clone(), event, "customer")?;
    let raw_status = required(subscription.status.as_deref(), event, "status")?;
    let status = SubscriptionStatus::from_provider(raw_status)
        .ok_or_else(|| malformed(event, &format!("unknown subscription status {raw_status}")))?;
    let period = required(subscription.period(), event, "current period")?;
    let pause_behavior = subscription
        .pause_collection
        .as_ref()
        .and_then(|pause| pause.behavior.clone());

    Ok(BillingIntent::SubscriptionUpdated(SubscriptionUpdated {
        price_id: subscription.price_id().map(str::to_string),
        external_subscription_id: subscription.id,
        external_customer_id,
        status,
        period,
        pause_behavior,
    }))
}

fn subscription_deleted(event: &StripeEvent) -> Result<BillingIntent, BillingError> {
    #[derive(Deserialize)]
    struct SubscriptionObject {
        id: Option<String>,
        customer: Option<Expandable>,
    }

    let subscription: SubscriptionObject = object(event)?;

    Ok(BillingIntent::SubscriptionCanceled(SubscriptionCanceled {
        external_subscription_id: required(subscription.id, event, "id")?,
        external_customer_id: required(subscription.customer, event, "customer")?.into_id(),
    }))
}
