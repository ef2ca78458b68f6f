use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::entitlements::EntitlementModel,
    infra::db::postgres::schema::entitlements,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = entitlements)]
pub struct EntitlementEntity {
    pub id: Uuid,
    pub account_id: Uuid,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub plan_id: Option<Uuid>,
    pub status: String,
    pub is_active: bool,
    pub is_paused: bool,
    pub credits: i32,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub last_credit_refill_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal row created on first reference to an account. Everything else takes the column defaults.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = entitlements)]
pub struct InsertEntitlementEntity {
    pub account_id: Uuid,
    pub status: String,
}

/// Full write-back of a reconciled record. `None` clears the column.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = entitlements, treat_none_as_null = true)]
pub struct UpdateEntitlementEntity {
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub plan_id: Option<Uuid>,
    pub status: String,
    pub is_active: bool,
    pub is_paused: bool,
    pub credits: i32,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub last_credit_refill_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateEntitlementEntity {
    pub fn from_model(model: &EntitlementModel, updated_at: DateTime<Utc>) -> Self {
        Self {
            external_customer_id: model.external_customer_id.clone(),
            external_subscription_id: model.external_subscription_id.clone(),
            plan_id: model.plan_id,
            status: model.status.to_string(),
            is_active: model.is_active,
            is_paused: model.is_paused,
            credits: model.credits.max(0),
            current_period_start: model.current_period_start,
            current_period_end: model.current_period_end,
            last_credit_refill_date: model.last_credit_refill_date,
            updated_at,
        }
    }

    /// Applies the changeset to an in-memory row the same way the UPDATE does in Postgres.
    pub fn apply_to(self, entity: &mut EntitlementEntity) {
        entity.external_customer_id = self.external_customer_id;
        entity.external_subscription_id = self.external_subscription_id;
        entity.plan_id = self.plan_id;
        entity.status = self.status;
        entity.is_active = self.is_active;
        entity.is_paused = self.is_paused;
        entity.credits = self.credits;
        entity.current_period_start = self.current_period_start;
        entity.current_period_end = self.current_period_end;
        entity.last_credit_refill_date = self.last_credit_refill_date;
        entity.updated_at = self.updated_at;
    }
}
