use anyhow::anyhow;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::plan_types::PlanType, infra::db::postgres::schema::plans,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntity {
    pub id: Uuid,
    pub name: String,
    pub external_price_id: String,
    pub plan_type: PlanType,
    pub monthly_credit_allotment: i32,
    pub price_minor: i64,
    pub currency: String,
    pub is_active: bool,
}

/// Raw row used for Diesel queries. `plan_type` stays as text and is parsed into PlanType.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = plans)]
pub struct PlanRow {
    pub id: Uuid,
    pub name: String,
    pub external_price_id: String,
    pub plan_type: String,
    pub monthly_credit_allotment: i32,
    pub price_minor: i64,
    pub currency: String,
    pub is_active: bool,
}

impl TryFrom<PlanRow> for PlanEntity {
    type Error = anyhow::Error;

    fn try_from(value: PlanRow) -> Result<Self, Self::Error> {
        let plan_type = PlanType::from_str(&value.plan_type)
            .ok_or_else(|| anyhow!("plan {} has unknown plan_type {}", value.id, value.plan_type))?;

        Ok(Self {
            id: value.id,
            name: value.name,
            external_price_id: value.external_price_id,
            plan_type,
            monthly_credit_allotment: value.monthly_credit_allotment.max(0),
            price_minor: value.price_minor,
            currency: value.currency,
            is_active: value.is_active,
        })
    }
}
