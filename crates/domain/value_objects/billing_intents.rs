use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::value_objects::{
    entitlements::EntitlementLookup, enums::subscription_statuses::SubscriptionStatus,
};

/// Provider-agnostic meaning of a webhook event, produced by the event normalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingIntent {
    SubscriptionActivated(SubscriptionActivated),
    CustomerAttached(CustomerAttached),
    PaymentSucceeded(InvoicePayment),
    PaymentFailed(PaymentFailure),
    SubscriptionUpdated(SubscriptionUpdated),
    SubscriptionCanceled(SubscriptionCanceled),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    Intent(BillingIntent),
    Unhandled { event_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// Returns `None` unless `end > start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }
}

/// Checkout completed in subscription mode.
///
/// `status` and `period` are optional because checkout session payloads usually
/// do not carry them; the webhook use case fills them from the provider's
/// subscription snapshot before the intent is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionActivated {
    pub account_id: Uuid,
    pub external_customer_id: String,
    pub external_subscription_id: String,
    pub plan_id: Uuid,
    pub status: Option<SubscriptionStatus>,
    pub period: Option<BillingPeriod>,
    pub replaces_subscription_id: Option<String>,
}

/// Checkout completed in setup mode: only the customer id is trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAttached {
    pub account_id: Uuid,
    pub external_customer_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSnapshot {
    pub external_invoice_id: String,
    pub amount_due_minor: i64,
    pub currency: String,
    pub status: String,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePayment {
    pub external_subscription_id: String,
    pub external_customer_id: String,
    /// Service period covered by the invoice line; its end is the new `current_period_end`.
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: DateTime<Utc>,
    pub invoice: InvoiceSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentFailureKind {
    /// A renewal charge failed; the provider keeps retrying.
    CycleRenewal,
    Other,
}

impl PaymentFailureKind {
    pub fn from_billing_reason(billing_reason: Option<&str>) -> Self {
        match billing_reason {
            Some("subscription_cycle") => PaymentFailureKind::CycleRenewal,
            _ => PaymentFailureKind::Other,
        }
    }

    pub fn resulting_status(&self) -> SubscriptionStatus {
        match self {
            PaymentFailureKind::CycleRenewal => SubscriptionStatus::PastDue,
            PaymentFailureKind::Other => SubscriptionStatus::Unpaid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentFailure {
    pub payment: InvoicePayment,
    pub kind: PaymentFailureKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdated {
    pub external_subscription_id: String,
    pub external_customer_id: String,
    pub price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub period: BillingPeriod,
    /// `pause_collection.behavior`; present means collection is paused.
    pub pause_behavior: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionCanceled {
    pub external_subscription_id: String,
    pub external_customer_id: String,
}

impl BillingIntent {
    pub fn name(&self) -> &'static str {
        match self {
            BillingIntent::SubscriptionActivated(_) => "subscription_activated",
            BillingIntent::CustomerAttached(_) => "customer_attached",
            BillingIntent::PaymentSucceeded(_) => "payment_succeeded",
            BillingIntent::PaymentFailed(_) => "payment_failed",
            BillingIntent::SubscriptionUpdated(_) => "subscription_updated",
            BillingIntent::SubscriptionCanceled(_) => "subscription_canceled",
        }
    }

    /// How the target record is located.
    pub fn lookup(&self) -> EntitlementLookup {
        match self {
            BillingIntent::SubscriptionActivated(intent) => {
                EntitlementLookup::Account(intent.account_id)
            }
            BillingIntent::CustomerAttached(intent) => EntitlementLookup::Account(intent.account_id),
            BillingIntent::PaymentSucceeded(payment) => {
                EntitlementLookup::Subscription(payment.external_subscription_id.clone())
            }
            BillingIntent::PaymentFailed(failure) => {
                EntitlementLookup::Subscription(failure.payment.external_subscription_id.clone())
            }
            BillingIntent::SubscriptionUpdated(intent) => EntitlementLookup::SubscriptionAndCustomer {
                subscription_id: intent.external_subscription_id.clone(),
                customer_id: intent.external_customer_id.clone(),
            },
            BillingIntent::SubscriptionCanceled(intent) => {
                EntitlementLookup::SubscriptionAndCustomer {
                    subscription_id: intent.external_subscription_id.clone(),
                    customer_id: intent.external_customer_id.clone(),
                }
            }
        }
    }

    /// Only activation intents may create the record; everything else fails fast with NotFound.
    pub fn creates_if_absent(&self) -> bool {
        matches!(
            self,
            BillingIntent::SubscriptionActivated(_) | BillingIntent::CustomerAttached(_)
        )
    }

    /// Subscription id the intent writes onto the located record, if any.
    pub fn claimed_subscription_id(&self) -> Option<&str> {
        match self {
            BillingIntent::SubscriptionActivated(intent) => {
                Some(intent.external_subscription_id.as_str())
            }
            _ => None,
        }
    }

    /// External invoice id for intents that append an invoice.
    pub fn external_invoice_id(&self) -> Option<&str> {
        match self {
            BillingIntent::PaymentSucceeded(payment) => {
                Some(payment.invoice.external_invoice_id.as_str())
            }
            BillingIntent::PaymentFailed(failure) => {
                Some(failure.payment.invoice.external_invoice_id.as_str())
            }
            _ => None,
        }
    }
}
