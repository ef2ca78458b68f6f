//! In-process billing store.
//!
//! Implements the same repository traits as the Postgres adapters. A single
//! mutex stands in for the row lock, so every operation here is atomic.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    access_evaluation,
    entities::{
        entitlements::{EntitlementEntity, UpdateEntitlementEntity},
        invoices::InvoiceEntity,
        plans::PlanEntity,
    },
    reconciliation::{self, ResolvedPlans},
    repositories::{
        entitlements::EntitlementRepository, invoices::InvoiceRepository, plans::PlanRepository,
    },
    value_objects::{
        billing_errors::BillingError,
        billing_intents::{BillingIntent, BillingPeriod},
        entitlements::{
            ENDED_SUBSCRIPTION_SENTINEL, EntitlementLookup, EntitlementModel, SpendOutcome,
            TransitionOutcome,
        },
        enums::{plan_types::PlanType, subscription_statuses::SubscriptionStatus},
    },
};

#[derive(Default)]
struct StoreState {
    plans: Vec<PlanEntity>,
    /// Keyed by account id; one record per account.
    entitlements: HashMap<Uuid, EntitlementEntity>,
    invoices: Vec<InvoiceEntity>,
}

impl StoreState {
    fn find_account(&self, lookup: &EntitlementLookup) -> Option<Uuid> {
        match lookup {
            EntitlementLookup::Account(account_id) => self
                .entitlements
                .contains_key(account_id)
                .then_some(*account_id),
            EntitlementLookup::Subscription(subscription_id) => self
                .entitlements
                .values()
                .find(|entity| {
                    entity.external_subscription_id.as_deref() == Some(subscription_id.as_str())
                })
                .map(|entity| entity.account_id),
            EntitlementLookup::SubscriptionAndCustomer {
                subscription_id,
                customer_id,
            } => self
                .entitlements
                .values()
                .find(|entity| {
                    entity.external_subscription_id.as_deref() == Some(subscription_id.as_str())
                        && entity.external_customer_id.as_deref() == Some(customer_id.as_str())
                })
                .map(|entity| entity.account_id),
        }
    }

    /// Another account whose live subscription id is `subscription_id`.
    fn held_by_other_account(&self, subscription_id: &str, account_id: Uuid) -> bool {
        subscription_id != ENDED_SUBSCRIPTION_SENTINEL
            && self.entitlements.values().any(|entity| {
                entity.account_id != account_id
                    && entity.external_subscription_id.as_deref() == Some(subscription_id)
            })
    }

    fn blank_entity(account_id: Uuid, now: DateTime<Utc>) -> EntitlementEntity {
        EntitlementEntity {
            id: Uuid::new_v4(),
            account_id,
            external_customer_id: None,
            external_subscription_id: None,
            plan_id: None,
            status: SubscriptionStatus::Incomplete.to_string(),
            is_active: false,
            is_paused: false,
            credits: 0,
            current_period_start: None,
            current_period_end: None,
            last_credit_refill_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: Vec<PlanEntity>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                plans,
                ..StoreState::default()
            })),
        }
    }

    /// Replaces (or inserts) the record for `entity.account_id`.
    pub async fn put_entitlement(&self, entity: EntitlementEntity) {
        let mut state = self.state.lock().await;
        state.entitlements.insert(entity.account_id, entity);
    }
}

#[async_trait]
impl PlanRepository for InMemoryBillingStore {
    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        let state = self.state.lock().await;
        Ok(state.plans.iter().find(|plan| plan.id == plan_id).cloned())
    }

    async fn find_active_by_price_id(&self, price_id: &str) -> Result<Option<PlanEntity>> {
        let state = self.state.lock().await;
        Ok(state
            .plans
            .iter()
            .find(|plan| plan.is_active && plan.external_price_id == price_id)
            .cloned())
    }

    async fn find_lifetime_plan(&self) -> Result<Option<PlanEntity>> {
        let state = self.state.lock().await;
        let mut lifetime = state
            .plans
            .iter()
            .filter(|plan| plan.plan_type == PlanType::Lifetime)
            .collect::<Vec<_>>();
        lifetime.sort_by_key(|plan| !plan.is_active);
        Ok(lifetime.first().map(|plan| (*plan).clone()))
    }

    async fn list_active_plans(&self) -> Result<Vec<PlanEntity>> {
        let state = self.state.lock().await;
        let mut plans = state
            .plans
            .iter()
            .filter(|plan| plan.is_active)
            .cloned()
            .collect::<Vec<_>>();
        plans.sort_by_key(|plan| plan.price_minor);
        Ok(plans)
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryBillingStore {
    async fn list_by_account_id(&self, account_id: Uuid) -> Result<Vec<InvoiceEntity>> {
        let state = self.state.lock().await;
        let mut invoices = state
            .invoices
            .iter()
            .filter(|invoice| invoice.account_id == account_id)
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }
}

#[async_trait]
impl EntitlementRepository for InMemoryBillingStore {
    async fn find_by_account_id(&self, account_id: Uuid) -> Result<Option<EntitlementEntity>> {
        let state = self.state.lock().await;
        Ok(state.entitlements.get(&account_id).cloned())
    }

    async fn apply_intent(
        &self,
        intent: BillingIntent,
        resolved: ResolvedPlans,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, BillingError> {
        let mut state = self.state.lock().await;
        let lookup = intent.lookup();

        let account_id = state.find_account(&lookup);

        if let (Some(subscription_id), EntitlementLookup::Account(target)) =
            (intent.claimed_subscription_id(), &lookup)
        {
            if state.held_by_other_account(subscription_id, *target) {
                return Err(BillingError::SubscriptionConflict(format!(
                    "{subscription_id} is live on another account"
                )));
            }
        }

        if let Some(external_invoice_id) = intent.external_invoice_id() {
            let recorded = state
                .invoices
                .iter()
                .any(|invoice| invoice.external_invoice_id == external_invoice_id);
            if recorded {
                return Ok(TransitionOutcome::Duplicate {
                    external_invoice_id: external_invoice_id.to_string(),
                });
            }
        }

        // Work on a copy so a failed transition leaves the store untouched.
        let (current, created) = match (account_id, &lookup) {
            (Some(account_id), _) => (state.entitlements.get(&account_id).cloned(), false),
            (None, EntitlementLookup::Account(account_id)) if intent.creates_if_absent() => {
                (Some(StoreState::blank_entity(*account_id, now)), true)
            }
            (None, _) => (None, false),
        };

        let model = current
            .as_ref()
            .map(|entity| EntitlementModel::try_from(entity.clone()))
            .transpose()?;
        let transition = reconciliation::apply_intent(model, &intent, &resolved, now)?;

        let Some(mut entity) = current else {
            return Err(BillingError::NotFound(format!("no entitlement for {lookup}")));
        };
        UpdateEntitlementEntity::from_model(&transition.record, now).apply_to(&mut entity);
        state.entitlements.insert(entity.account_id, entity.clone());

        let invoice_recorded = match transition.invoice {
            Some(invoice) => {
                let duplicate = state
                    .invoices
                    .iter()
                    .any(|existing| existing.external_invoice_id == invoice.external_invoice_id);
                if !duplicate {
                    state.invoices.push(InvoiceEntity {
                        id: Uuid::new_v4(),
                        account_id: invoice.account_id,
                        external_invoice_id: invoice.external_invoice_id,
                        external_subscription_id: invoice.external_subscription_id,
                        amount_due_minor: invoice.amount_due_minor,
                        currency: invoice.currency,
                        status: invoice.status,
                        period_start: invoice.period_start,
                        period_end: invoice.period_end,
                        hosted_invoice_url: invoice.hosted_invoice_url,
                        invoice_pdf: invoice.invoice_pdf,
                        succeeded: invoice.succeeded,
                        created_at: now,
                    });
                }
                !duplicate
            }
            None => false,
        };

        Ok(TransitionOutcome::Applied {
            entitlement: entity,
            created,
            invoice_recorded,
        })
    }

    async fn evaluate_access(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<EntitlementEntity>> {
        let mut state = self.state.lock().await;

        let Some(entity) = state.entitlements.get(&account_id).cloned() else {
            return Ok(None);
        };
        let plan = entity
            .plan_id
            .and_then(|plan_id| state.plans.iter().find(|plan| plan.id == plan_id).cloned());

        let mut record = EntitlementModel::try_from(entity.clone())?;
        let evaluation = access_evaluation::evaluate_access(&mut record, plan.as_ref(), now);
        if !evaluation.changed() {
            return Ok(Some(entity));
        }

        let mut updated = entity;
        UpdateEntitlementEntity::from_model(&record, now).apply_to(&mut updated);
        state.entitlements.insert(account_id, updated.clone());

        Ok(Some(updated))
    }

    async fn spend_credits(&self, account_id: Uuid, amount: i32) -> Result<SpendOutcome> {
        let mut state = self.state.lock().await;

        let Some(entity) = state
            .entitlements
            .get_mut(&account_id)
            .filter(|entity| entity.is_active)
        else {
            return Ok(SpendOutcome::NoActiveSubscription);
        };

        if entity.credits < amount {
            return Ok(SpendOutcome::InsufficientCredits {
                available: entity.credits,
            });
        }

        entity.credits -= amount;
        entity.updated_at = Utc::now();
        Ok(SpendOutcome::Spent {
            remaining: entity.credits,
        })
    }

    async fn mark_paused(&self, account_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(entity) = state.entitlements.get_mut(&account_id) {
            entity.is_paused = true;
            entity.is_active = false;
            entity.status = SubscriptionStatus::Paused.to_string();
            entity.updated_at = Utc::now();
        }

        Ok(())
    }

    async fn mark_resumed(&self, account_id: Uuid, period: Option<BillingPeriod>) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(entity) = state.entitlements.get_mut(&account_id) {
            entity.is_paused = false;
            entity.is_active = true;
            entity.status = SubscriptionStatus::Active.to_string();
            if let Some(period) = period {
                entity.current_period_start = Some(period.start);
                entity.current_period_end = Some(period.end);
            }
            entity.updated_at = Utc::now();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::value_objects::billing_intents::{
        InvoicePayment, InvoiceSnapshot, SubscriptionActivated,
    };

    fn monthly_plan() -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            name: "Monthly".to_string(),
            external_price_id: "price_monthly".to_string(),
            plan_type: PlanType::Monthly,
            monthly_credit_allotment: 50,
            price_minor: 990,
            currency: "usd".to_string(),
            is_active: true,
        }
    }

    fn active_entity(plan: &PlanEntity, credits: i32, now: DateTime<Utc>) -> EntitlementEntity {
        let mut entity = StoreState::blank_entity(Uuid::new_v4(), now);
        entity.external_customer_id = Some("cus_1".to_string());
        entity.external_subscription_id = Some("sub_1".to_string());
        entity.plan_id = Some(plan.id);
        entity.status = SubscriptionStatus::Active.to_string();
        entity.is_active = true;
        entity.credits = credits;
        entity.current_period_start = Some(now - Duration::days(1));
        entity.current_period_end = Some(now + Duration::days(29));
        entity.last_credit_refill_date = Some(now - Duration::days(1));
        entity
    }

    fn payment_succeeded(invoice_id: &str, period_end: DateTime<Utc>) -> BillingIntent {
        BillingIntent::PaymentSucceeded(InvoicePayment {
            external_subscription_id: "sub_1".to_string(),
            external_customer_id: "cus_1".to_string(),
            period_start: Some(period_end - Duration::days(30)),
            period_end,
            invoice: InvoiceSnapshot {
                external_invoice_id: invoice_id.to_string(),
                amount_due_minor: 990,
                currency: "usd".to_string(),
                status: "paid".to_string(),
                hosted_invoice_url: None,
                invoice_pdf: None,
                period_start: None,
                period_end: None,
            },
        })
    }

    #[tokio::test]
    async fn duplicate_payment_records_one_invoice() {
        let plan = monthly_plan();
        let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
        let now = Utc::now();
        let entity = active_entity(&plan, 20, now);
        let account_id = entity.account_id;
        store.put_entitlement(entity).await;

        let intent = payment_succeeded("in_1", now + Duration::days(59));
        let first = store
            .apply_intent(intent.clone(), ResolvedPlans::default(), now)
            .await
            .unwrap();
        let after_first = store.find_by_account_id(account_id).await.unwrap();
        let second = store
            .apply_intent(intent, ResolvedPlans::default(), now)
            .await
            .unwrap();
        let after_second = store.find_by_account_id(account_id).await.unwrap();

        assert!(matches!(
            first,
            TransitionOutcome::Applied {
                invoice_recorded: true,
                ..
            }
        ));
        assert_eq!(
            second,
            TransitionOutcome::Duplicate {
                external_invoice_id: "in_1".to_string()
            }
        );
        assert_eq!(after_first, after_second);
        assert_eq!(store.list_by_account_id(account_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn activation_creates_missing_record() {
        let plan = monthly_plan();
        let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
        let now = Utc::now();
        let account_id = Uuid::new_v4();

        let intent = BillingIntent::SubscriptionActivated(SubscriptionActivated {
            account_id,
            external_customer_id: "cus_9".to_string(),
            external_subscription_id: "sub_9".to_string(),
            plan_id: plan.id,
            status: Some(SubscriptionStatus::Active),
            period: BillingPeriod::new(now, now + Duration::days(30)),
            replaces_subscription_id: None,
        });
        let resolved = ResolvedPlans {
            plan: Some(plan),
            lifetime_plan: None,
        };

        let outcome = store.apply_intent(intent, resolved, now).await.unwrap();

        let TransitionOutcome::Applied {
            entitlement,
            created,
            ..
        } = outcome
        else {
            panic!("activation should apply");
        };
        assert!(created);
        assert_eq!(entitlement.account_id, account_id);
        assert_eq!(entitlement.credits, 50);
        assert!(entitlement.is_active);
    }

    #[tokio::test]
    async fn activation_of_subscription_held_elsewhere_is_a_conflict() {
        let plan = monthly_plan();
        let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
        let now = Utc::now();
        let holder = active_entity(&plan, 20, now);
        let holder_id = holder.account_id;
        store.put_entitlement(holder).await;
        let newcomer = Uuid::new_v4();

        let intent = BillingIntent::SubscriptionActivated(SubscriptionActivated {
            account_id: newcomer,
            external_customer_id: "cus_2".to_string(),
            external_subscription_id: "sub_1".to_string(),
            plan_id: plan.id,
            status: Some(SubscriptionStatus::Active),
            period: BillingPeriod::new(now, now + Duration::days(30)),
            replaces_subscription_id: None,
        });
        let resolved = ResolvedPlans {
            plan: Some(plan),
            lifetime_plan: None,
        };

        let err = store.apply_intent(intent, resolved, now).await.unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionConflict(_)));
        assert!(err.is_terminal());
        assert!(store.find_by_account_id(newcomer).await.unwrap().is_none());
        let holder = store.find_by_account_id(holder_id).await.unwrap().unwrap();
        assert_eq!(holder.external_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(holder.credits, 20);
    }

    #[tokio::test]
    async fn payment_for_unknown_subscription_is_not_found() {
        let store = InMemoryBillingStore::new();
        let now = Utc::now();

        let result = store
            .apply_intent(
                payment_succeeded("in_404", now),
                ResolvedPlans::default(),
                now,
            )
            .await;

        assert!(matches!(result, Err(BillingError::NotFound(_))));
        assert!(store.state.lock().await.invoices.is_empty());
    }

    #[tokio::test]
    async fn spend_more_than_balance_leaves_record_unchanged() {
        let plan = monthly_plan();
        let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
        let entity = active_entity(&plan, 20, Utc::now());
        let account_id = entity.account_id;
        store.put_entitlement(entity.clone()).await;

        let outcome = store.spend_credits(account_id, 30).await.unwrap();

        assert_eq!(outcome, SpendOutcome::InsufficientCredits { available: 20 });
        assert_eq!(
            store.find_by_account_id(account_id).await.unwrap(),
            Some(entity)
        );
    }

    #[tokio::test]
    async fn spend_on_inactive_record_is_rejected() {
        let plan = monthly_plan();
        let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
        let mut entity = active_entity(&plan, 20, Utc::now());
        entity.is_active = false;
        let account_id = entity.account_id;
        store.put_entitlement(entity).await;

        let outcome = store.spend_credits(account_id, 5).await.unwrap();

        assert_eq!(outcome, SpendOutcome::NoActiveSubscription);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_spends_never_overdraw() {
        let plan = monthly_plan();
        let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
        let entity = active_entity(&plan, 50, Utc::now());
        let account_id = entity.account_id;
        store.put_entitlement(entity).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.spend_credits(account_id, 10).await
            }));
        }

        let mut spent = 0;
        for handle in handles {
            if let SpendOutcome::Spent { .. } = handle.await.unwrap().unwrap() {
                spent += 1;
            }
        }

        assert_eq!(spent, 5);
        let entity = store.find_by_account_id(account_id).await.unwrap().unwrap();
        assert_eq!(entity.credits, 0);
    }

    #[tokio::test]
    async fn evaluate_access_expires_elapsed_period() {
        let plan = monthly_plan();
        let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
        let now = Utc::now();
        let mut entity = active_entity(&plan, 50, now);
        entity.current_period_end = Some(now - Duration::seconds(1));
        entity.current_period_start = Some(now - Duration::days(30));
        let account_id = entity.account_id;
        store.put_entitlement(entity).await;

        let evaluated = store
            .evaluate_access(account_id, now)
            .await
            .unwrap()
            .unwrap();

        assert!(!evaluated.is_active);
        assert_eq!(evaluated.status, SubscriptionStatus::Ended.as_str());
        assert_eq!(evaluated.credits, 0);

        let again = store
            .evaluate_access(account_id, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, evaluated);
    }
}
