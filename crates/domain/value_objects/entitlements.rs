use std::fmt::Display;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::{entitlements::EntitlementEntity, invoices::InvoiceEntity, plans::PlanEntity},
    value_objects::{enums::subscription_statuses::SubscriptionStatus, plans::PlanDto},
};

/// Stored in `external_subscription_id` once a subscription was deliberately terminated.
/// Distinguishes an ended slot from one that never had a subscription (`None`).
pub const ENDED_SUBSCRIPTION_SENTINEL: &str = "ended";

/// Typed view of an entitlement row that the reconciliation engine and evaluator work on.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementModel {
    pub id: Uuid,
    pub account_id: Uuid,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub plan_id: Option<Uuid>,
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub is_paused: bool,
    pub credits: i32,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub last_credit_refill_date: Option<DateTime<Utc>>,
}

impl EntitlementModel {
    /// A record for an account that never subscribed.
    pub fn blank(id: Uuid, account_id: Uuid) -> Self {
        Self {
            id,
            account_id,
            external_customer_id: None,
            external_subscription_id: None,
            plan_id: None,
            status: SubscriptionStatus::Incomplete,
            is_active: false,
            is_paused: false,
            credits: 0,
            current_period_start: None,
            current_period_end: None,
            last_credit_refill_date: None,
        }
    }

    /// Live provider subscription id, ignoring the ended sentinel.
    pub fn live_subscription_id(&self) -> Option<&str> {
        self.external_subscription_id
            .as_deref()
            .filter(|id| *id != ENDED_SUBSCRIPTION_SENTINEL)
    }
}

impl TryFrom<EntitlementEntity> for EntitlementModel {
    type Error = anyhow::Error;

    fn try_from(value: EntitlementEntity) -> Result<Self, Self::Error> {
        let status = SubscriptionStatus::from_str(&value.status).ok_or_else(|| {
            anyhow!(
                "entitlement {} has unknown status {}",
                value.id,
                value.status
            )
        })?;

        Ok(Self {
            id: value.id,
            account_id: value.account_id,
            external_customer_id: value.external_customer_id,
            external_subscription_id: value.external_subscription_id,
            plan_id: value.plan_id,
            status,
            is_active: value.is_active,
            is_paused: value.is_paused,
            credits: value.credits.max(0),
            current_period_start: value.current_period_start,
            current_period_end: value.current_period_end,
            last_credit_refill_date: value.last_credit_refill_date,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementLookup {
    Account(Uuid),
    Subscription(String),
    SubscriptionAndCustomer {
        subscription_id: String,
        customer_id: String,
    },
}

impl Display for EntitlementLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntitlementLookup::Account(account_id) => write!(f, "account {account_id}"),
            EntitlementLookup::Subscription(subscription_id) => {
                write!(f, "subscription {subscription_id}")
            }
            EntitlementLookup::SubscriptionAndCustomer {
                subscription_id,
                customer_id,
            } => write!(f, "subscription {subscription_id} for customer {customer_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied {
        entitlement: EntitlementEntity,
        created: bool,
        invoice_recorded: bool,
    },
    /// The invoice carried by the intent was already recorded; nothing changed.
    Duplicate { external_invoice_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendOutcome {
    Spent { remaining: i32 },
    InsufficientCredits { available: i32 },
    NoActiveSubscription,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntitlementDto {
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub is_paused: bool,
    pub credits: i32,
    pub plan: Option<PlanDto>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub last_credit_refill_date: Option<DateTime<Utc>>,
    pub has_billing_customer: bool,
}

impl EntitlementDto {
    pub fn empty() -> Self {
        Self {
            status: SubscriptionStatus::Incomplete,
            is_active: false,
            is_paused: false,
            credits: 0,
            plan: None,
            current_period_start: None,
            current_period_end: None,
            last_credit_refill_date: None,
            has_billing_customer: false,
        }
    }

    pub fn from_model(model: &EntitlementModel, plan: Option<PlanEntity>) -> Self {
        Self {
            status: model.status,
            is_active: model.is_active,
            is_paused: model.is_paused,
            credits: model.credits,
            plan: plan.map(PlanDto::from),
            current_period_start: model.current_period_start,
            current_period_end: model.current_period_end,
            last_credit_refill_date: model.last_credit_refill_date,
            has_billing_customer: model.external_customer_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InvoiceDto {
    pub external_invoice_id: String,
    pub amount_due_minor: i64,
    pub currency: String,
    pub status: String,
    pub succeeded: bool,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<InvoiceEntity> for InvoiceDto {
    fn from(value: InvoiceEntity) -> Self {
        Self {
            external_invoice_id: value.external_invoice_id,
            amount_due_minor: value.amount_due_minor,
            currency: value.currency,
            status: value.status,
            succeeded: value.succeeded,
            period_start: value.period_start,
            period_end: value.period_end,
            hosted_invoice_url: value.hosted_invoice_url,
            invoice_pdf: value.invoice_pdf,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardDto {
    pub entitlement: EntitlementDto,
    pub invoices: Vec<InvoiceDto>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreditBalanceDto {
    pub credits: i32,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SpendCreditsRequest {
    pub amount: i32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SpendCreditsResponse {
    pub spent: i32,
    pub remaining: i32,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub price_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutSessionDto {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutConfirmationDto {
    pub session_id: String,
    pub mode: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutAbandonedDto {
    pub session_id: String,
    pub redirect: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionQuery {
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ended_sentinel_is_not_a_live_subscription() {
        let mut model = EntitlementModel::blank(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(model.live_subscription_id(), None);

        model.external_subscription_id = Some(ENDED_SUBSCRIPTION_SENTINEL.to_string());
        assert_eq!(model.live_subscription_id(), None);

        model.external_subscription_id = Some("sub_123".to_string());
        assert_eq!(model.live_subscription_id(), Some("sub_123"));
    }

    #[test]
    fn unknown_stored_status_is_rejected() {
        let now = Utc::now();
        let entity = EntitlementEntity {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            external_customer_id: None,
            external_subscription_id: None,
            plan_id: None,
            status: "expired".to_string(),
            is_active: false,
            is_paused: false,
            credits: 0,
            current_period_start: None,
            current_period_end: None,
            last_credit_refill_date: None,
            created_at: now,
            updated_at: now,
        };

        assert!(EntitlementModel::try_from(entity).is_err());
    }
}
