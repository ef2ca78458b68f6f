use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::entitlements::EntitlementEntity,
    reconciliation::ResolvedPlans,
    value_objects::{
        billing_errors::BillingError,
        billing_intents::{BillingIntent, BillingPeriod},
        entitlements::{SpendOutcome, TransitionOutcome},
    },
};

#[automock]
#[async_trait]
pub trait EntitlementRepository {
    async fn find_by_account_id(&self, account_id: Uuid) -> Result<Option<EntitlementEntity>>;

    /// Applies one intent atomically: row lock, transition, invoice insert.
    /// An intent whose invoice is already recorded is reported as `Duplicate`
    /// and leaves the record untouched.
    async fn apply_intent(
        &self,
        intent: BillingIntent,
        plans: ResolvedPlans,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, BillingError>;

    /// Runs lazy expiry and refill under the row lock. `None` when the account has no record.
    async fn evaluate_access(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<EntitlementEntity>>;

    /// Single atomic check-and-decrement.
    async fn spend_credits(&self, account_id: Uuid, amount: i32) -> Result<SpendOutcome>;

    /// Local pause mark written right after the provider accepted the pause.
    async fn mark_paused(&self, account_id: Uuid) -> Result<()>;

    /// Local resume mark; `period` is the provider's authoritative period when known.
    async fn mark_resumed(&self, account_id: Uuid, period: Option<BillingPeriod>) -> Result<()>;
}
