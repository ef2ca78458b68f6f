use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    OptionalExtension, PgConnection, RunQueryDsl, dsl::exists, insert_into, prelude::*, select,
    update,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{entitlements, invoices, plans},
    },
};
use domain::{
    access_evaluation,
    entities::{
        entitlements::{EntitlementEntity, InsertEntitlementEntity, UpdateEntitlementEntity},
        plans::{PlanEntity, PlanRow},
    },
    reconciliation::{self, ResolvedPlans},
    repositories::entitlements::EntitlementRepository,
    value_objects::{
        billing_errors::BillingError,
        billing_intents::{BillingIntent, BillingPeriod},
        entitlements::{
            ENDED_SUBSCRIPTION_SENTINEL, EntitlementLookup, EntitlementModel, SpendOutcome,
            TransitionOutcome,
        },
        enums::subscription_statuses::SubscriptionStatus,
    },
};

pub struct EntitlementPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl EntitlementPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

/// `SELECT ... FOR UPDATE` on the one record the lookup points at.
fn lock_entitlement(
    conn: &mut PgConnection,
    lookup: &EntitlementLookup,
) -> QueryResult<Option<EntitlementEntity>> {
    match lookup {
        EntitlementLookup::Account(account_id) => entitlements::table
            .filter(entitlements::account_id.eq(account_id))
            .select(EntitlementEntity::as_select())
            .for_update()
            .first::<EntitlementEntity>(conn)
            .optional(),
        EntitlementLookup::Subscription(subscription_id) => entitlements::table
            .filter(entitlements::external_subscription_id.eq(subscription_id))
            .select(EntitlementEntity::as_select())
            .for_update()
            .first::<EntitlementEntity>(conn)
            .optional(),
        EntitlementLookup::SubscriptionAndCustomer {
            subscription_id,
            customer_id,
        } => entitlements::table
            .filter(entitlements::external_subscription_id.eq(subscription_id))
            .filter(entitlements::external_customer_id.eq(customer_id))
            .select(EntitlementEntity::as_select())
            .for_update()
            .first::<EntitlementEntity>(conn)
            .optional(),
    }
}

fn write_back(
    conn: &mut PgConnection,
    record: &EntitlementModel,
    now: DateTime<Utc>,
) -> QueryResult<EntitlementEntity> {
    update(entitlements::table.filter(entitlements::id.eq(record.id)))
        .set(&UpdateEntitlementEntity::from_model(record, now))
        .returning(EntitlementEntity::as_returning())
        .get_result::<EntitlementEntity>(conn)
}

#[async_trait]
impl EntitlementRepository for EntitlementPostgres {
    async fn find_by_account_id(&self, account_id: Uuid) -> Result<Option<EntitlementEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = entitlements::table
            .filter(entitlements::account_id.eq(account_id))
            .select(EntitlementEntity::as_select())
            .first::<EntitlementEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn apply_intent(
        &self,
        intent: BillingIntent,
        resolved: ResolvedPlans,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, BillingError> {
        let mut conn = Arc::clone(&self.db_pool)
            .get()
            .map_err(|err| BillingError::ProcessingError(err.into()))?;

        conn.transaction::<_, BillingError, _>(|conn| {
            let lookup = intent.lookup();

            if let (Some(subscription_id), EntitlementLookup::Account(account_id)) =
                (intent.claimed_subscription_id(), &lookup)
            {
                let held_elsewhere = select(exists(
                    entitlements::table
                        .filter(entitlements::external_subscription_id.eq(subscription_id))
                        .filter(entitlements::account_id.ne(account_id)),
                ))
                .get_result::<bool>(conn)?;

                // Would violate the partial unique index on the live subscription id.
                if held_elsewhere && subscription_id != ENDED_SUBSCRIPTION_SENTINEL {
                    return Err(BillingError::SubscriptionConflict(format!(
                        "{subscription_id} is live on another account"
                    )));
                }
            }

            let mut created = false;
            if let (true, EntitlementLookup::Account(account_id)) =
                (intent.creates_if_absent(), &lookup)
            {
                created = insert_into(entitlements::table)
                    .values(&InsertEntitlementEntity {
                        account_id: *account_id,
                        status: SubscriptionStatus::Incomplete.to_string(),
                    })
                    .on_conflict(entitlements::account_id)
                    .do_nothing()
                    .execute(conn)?
                    > 0;
            }

            let current = lock_entitlement(conn, &lookup)?;

            // Checked under the row lock so concurrent redeliveries serialize here.
            if let Some(external_invoice_id) = intent.external_invoice_id() {
                let recorded = select(exists(
                    invoices::table.filter(invoices::external_invoice_id.eq(external_invoice_id)),
                ))
                .get_result::<bool>(conn)?;

                if recorded {
                    return Ok(TransitionOutcome::Duplicate {
                        external_invoice_id: external_invoice_id.to_string(),
                    });
                }
            }

            let current = current.map(EntitlementModel::try_from).transpose()?;
            let transition = reconciliation::apply_intent(current, &intent, &resolved, now)?;

            let entitlement = write_back(conn, &transition.record, now)?;

            let invoice_recorded = match transition.invoice {
                Some(invoice) => {
                    insert_into(invoices::table)
                        .values(&invoice)
                        .on_conflict(invoices::external_invoice_id)
                        .do_nothing()
                        .execute(conn)?
                        > 0
                }
                None => false,
            };

            Ok(TransitionOutcome::Applied {
                entitlement,
                created,
                invoice_recorded,
            })
        })
    }

    async fn evaluate_access(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<EntitlementEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            let Some(entity) = lock_entitlement(conn, &EntitlementLookup::Account(account_id))?
            else {
                return Ok(None);
            };

            let plan = match entity.plan_id {
                Some(plan_id) => plans::table
                    .filter(plans::id.eq(plan_id))
                    .select(PlanRow::as_select())
                    .first::<PlanRow>(conn)
                    .optional()?
                    .map(PlanEntity::try_from)
                    .transpose()?,
                None => None,
            };

            let mut record = EntitlementModel::try_from(entity.clone())?;
            let evaluation = access_evaluation::evaluate_access(&mut record, plan.as_ref(), now);
            if !evaluation.changed() {
                return Ok(Some(entity));
            }

            Ok(Some(write_back(conn, &record, now)?))
        })
    }

    async fn spend_credits(&self, account_id: Uuid, amount: i32) -> Result<SpendOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let remaining = update(entitlements::table)
            .filter(entitlements::account_id.eq(account_id))
            .filter(entitlements::is_active.eq(true))
            .filter(entitlements::credits.ge(amount))
            .set((
                entitlements::credits.eq(entitlements::credits - amount),
                entitlements::updated_at.eq(Utc::now()),
            ))
            .returning(entitlements::credits)
            .get_result::<i32>(&mut conn)
            .optional()?;

        if let Some(remaining) = remaining {
            return Ok(SpendOutcome::Spent { remaining });
        }

        let current = entitlements::table
            .filter(entitlements::account_id.eq(account_id))
            .select((entitlements::is_active, entitlements::credits))
            .first::<(bool, i32)>(&mut conn)
            .optional()?;

        Ok(match current {
            Some((true, available)) => SpendOutcome::InsufficientCredits { available },
            _ => SpendOutcome::NoActiveSubscription,
        })
    }

    async fn mark_paused(&self, account_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(entitlements::table)
            .filter(entitlements::account_id.eq(account_id))
            .set((
                entitlements::is_paused.eq(true),
                entitlements::is_active.eq(false),
                entitlements::status.eq(SubscriptionStatus::Paused.to_string()),
                entitlements::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn mark_resumed(&self, account_id: Uuid, period: Option<BillingPeriod>) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let target = entitlements::table.filter(entitlements::account_id.eq(account_id));
        let flags = (
            entitlements::is_paused.eq(false),
            entitlements::is_active.eq(true),
            entitlements::status.eq(SubscriptionStatus::Active.to_string()),
            entitlements::updated_at.eq(Utc::now()),
        );

        match period {
            Some(period) => update(target)
                .set((
                    flags,
                    entitlements::current_period_start.eq(Some(period.start)),
                    entitlements::current_period_end.eq(Some(period.end)),
                ))
                .execute(&mut conn)?,
            None => update(target).set(flags).execute(&mut conn)?,
        };

        Ok(())
    }
}
