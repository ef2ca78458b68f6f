//! Pure state transitions for billing intents.
//!
//! Everything here works on an in-memory [`EntitlementModel`]; the repositories own
//! the transaction, the row lock and the invoice uniqueness check around it.

use chrono::{DateTime, Utc};

use crate::domain::{
    entities::{invoices::InsertInvoiceEntity, plans::PlanEntity},
    value_objects::{
        billing_errors::BillingError,
        billing_intents::{
            BillingIntent, CustomerAttached, InvoicePayment, PaymentFailure,
            SubscriptionActivated, SubscriptionCanceled, SubscriptionUpdated,
        },
        entitlements::{ENDED_SUBSCRIPTION_SENTINEL, EntitlementModel},
        enums::subscription_statuses::SubscriptionStatus,
    },
};

/// Catalog lookups done before the transaction opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPlans {
    /// Plan named by the intent (Activated: by id, Updated: by current price id).
    pub plan: Option<PlanEntity>,
    /// Downgrade target for Canceled.
    pub lifetime_plan: Option<PlanEntity>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: EntitlementModel,
    pub invoice: Option<InsertInvoiceEntity>,
}

pub fn apply_intent(
    current: Option<EntitlementModel>,
    intent: &BillingIntent,
    plans: &ResolvedPlans,
    now: DateTime<Utc>,
) -> Result<Transition, BillingError> {
    let Some(mut record) = current else {
        return Err(BillingError::NotFound(format!(
            "no entitlement for {}",
            intent.lookup()
        )));
    };

    let invoice = match intent {
        BillingIntent::SubscriptionActivated(activated) => {
            activate(&mut record, activated, plans, now)?;
            None
        }
        BillingIntent::CustomerAttached(attached) => {
            attach_customer(&mut record, attached);
            None
        }
        BillingIntent::PaymentSucceeded(payment) => Some(payment_succeeded(&mut record, payment)),
        BillingIntent::PaymentFailed(failure) => Some(payment_failed(&mut record, failure)),
        BillingIntent::SubscriptionUpdated(updated) => {
            subscription_updated(&mut record, updated, plans);
            None
        }
        BillingIntent::SubscriptionCanceled(canceled) => {
            subscription_canceled(&mut record, canceled, plans)?;
            None
        }
    };

    Ok(Transition { record, invoice })
}

fn activate(
    record: &mut EntitlementModel,
    intent: &SubscriptionActivated,
    plans: &ResolvedPlans,
    now: DateTime<Utc>,
) -> Result<(), BillingError> {
    let plan = plans
        .plan
        .as_ref()
        .filter(|plan| plan.id == intent.plan_id)
        .ok_or_else(|| BillingError::InvalidPlan(format!("plan {} is not in the catalog", intent.plan_id)))?;

    let status = intent.status.ok_or_else(|| {
        BillingError::MalformedEvent(format!(
            "activation of {} carries no subscription status",
            intent.external_subscription_id
        ))
    })?;
    let period = intent.period.ok_or_else(|| {
        BillingError::MalformedEvent(format!(
            "activation of {} carries no billing period",
            intent.external_subscription_id
        ))
    })?;

    // Redelivery of the same activation must not hand out the first-period grant again.
    let already_granted = record.external_subscription_id.as_deref()
        == Some(intent.external_subscription_id.as_str())
        && record.current_period_start == Some(period.start)
        && record.last_credit_refill_date.is_some();

    record.external_customer_id = Some(intent.external_customer_id.clone());
    record.external_subscription_id = Some(intent.external_subscription_id.clone());
    record.plan_id = Some(plan.id);
    record.status = status;
    record.is_active = status.grants_access();
    record.is_paused = false;
    record.current_period_start = Some(period.start);
    record.current_period_end = Some(period.end);

    if !already_granted {
        record.credits = plan.monthly_credit_allotment.max(0);
        record.last_credit_refill_date = Some(now);
    }

    Ok(())
}

fn attach_customer(record: &mut EntitlementModel, intent: &CustomerAttached) {
    record.external_customer_id = Some(intent.external_customer_id.clone());
}

fn payment_succeeded(record: &mut EntitlementModel, payment: &InvoicePayment) -> InsertInvoiceEntity {
    // A collected invoice means collection is running again.
    record.is_paused = false;
    record.status = SubscriptionStatus::Active;
    record.is_active = true;

    let advances = record
        .current_period_end
        .is_none_or(|current_end| payment.period_end > current_end);
    if advances {
        if let Some(start) = payment.period_start.filter(|start| *start < payment.period_end) {
            record.current_period_start = Some(start);
        }
        record.current_period_end = Some(payment.period_end);
    }

    invoice_row(record, payment, true)
}

fn payment_failed(record: &mut EntitlementModel, failure: &PaymentFailure) -> InsertInvoiceEntity {
    record.status = failure.kind.resulting_status();
    record.is_active = false;
    record.credits = 0;

    invoice_row(record, &failure.payment, false)
}

fn subscription_updated(
    record: &mut EntitlementModel,
    intent: &SubscriptionUpdated,
    plans: &ResolvedPlans,
) {
    // An unmapped price keeps the current plan; status and period still move.
    if let Some(plan) = plans.plan.as_ref() {
        record.plan_id = Some(plan.id);
    }

    record.current_period_start = Some(intent.period.start);
    record.current_period_end = Some(intent.period.end);

    if intent.pause_behavior.is_some() {
        record.is_paused = true;
        record.status = SubscriptionStatus::Paused;
    } else {
        record.is_paused = false;
        record.status = intent.status;
    }
    record.is_active = !record.is_paused && record.status.grants_access();
}

fn subscription_canceled(
    record: &mut EntitlementModel,
    intent: &SubscriptionCanceled,
    plans: &ResolvedPlans,
) -> Result<(), BillingError> {
    let lifetime = plans.lifetime_plan.as_ref().ok_or_else(|| {
        BillingError::InvalidPlan(format!(
            "no lifetime plan to downgrade {} to",
            intent.external_subscription_id
        ))
    })?;

    record.is_active = false;
    record.is_paused = false;
    record.status = SubscriptionStatus::Canceled;
    record.plan_id = Some(lifetime.id);
    record.credits = lifetime.monthly_credit_allotment.max(0);
    record.external_subscription_id = Some(ENDED_SUBSCRIPTION_SENTINEL.to_string());

    Ok(())
}

fn invoice_row(
    record: &EntitlementModel,
    payment: &InvoicePayment,
    succeeded: bool,
) -> InsertInvoiceEntity {
    let invoice = &payment.invoice;
    InsertInvoiceEntity {
        account_id: record.account_id,
        external_invoice_id: invoice.external_invoice_id.clone(),
        external_subscription_id: Some(payment.external_subscription_id.clone()),
        amount_due_minor: invoice.amount_due_minor,
        currency: invoice.currency.clone(),
        status: invoice.status.clone(),
        period_start: invoice.period_start.or(payment.period_start),
        period_end: invoice.period_end.or(Some(payment.period_end)),
        hosted_invoice_url: invoice.hosted_invoice_url.clone(),
        invoice_pdf: invoice.invoice_pdf.clone(),
        succeeded,
    }
}
