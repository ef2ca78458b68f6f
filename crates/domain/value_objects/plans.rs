use serde::Serialize;
use uuid::Uuid;

use crate::domain::{entities::plans::PlanEntity, value_objects::enums::plan_types::PlanType};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanDto {
    pub id: Uuid,
    pub name: String,
    pub price_id: String,
    pub plan_type: PlanType,
    pub monthly_credit_allotment: i32,
    pub price_minor: i64,
    pub currency: String,
}

impl From<PlanEntity> for PlanDto {
    fn from(value: PlanEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            price_id: value.external_price_id,
            plan_type: value.plan_type,
            monthly_credit_allotment: value.monthly_credit_allotment,
            price_minor: value.price_minor,
            currency: value.currency,
        }
    }
}
