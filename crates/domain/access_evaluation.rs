//! Lazy expiry and credit refill, evaluated on access instead of by a scheduler.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    entities::plans::PlanEntity,
    value_objects::{
        entitlements::EntitlementModel,
        enums::{plan_types::PlanType, subscription_statuses::SubscriptionStatus},
    },
};

pub const REFILL_INTERVAL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessEvaluation {
    pub expired: bool,
    pub refills_granted: u32,
}

impl AccessEvaluation {
    pub fn changed(&self) -> bool {
        self.expired || self.refills_granted > 0
    }
}

/// Expires an elapsed period, then tops up credits for every 30-day checkpoint
/// that fell due inside the paid period. Running it twice at the same `now`
/// leaves the record unchanged the second time.
pub fn evaluate_access(
    record: &mut EntitlementModel,
    plan: Option<&PlanEntity>,
    now: DateTime<Utc>,
) -> AccessEvaluation {
    let mut evaluation = AccessEvaluation::default();

    let is_lifetime = plan.is_some_and(|plan| plan.plan_type == PlanType::Lifetime);
    let elapsed = record.current_period_end.is_some_and(|end| end < now);

    if record.is_active && !is_lifetime && elapsed {
        record.is_active = false;
        record.status = SubscriptionStatus::Ended;
        record.credits = 0;
        evaluation.expired = true;
        return evaluation;
    }

    let Some(plan) = plan.filter(|plan| plan.plan_type.is_recurring()) else {
        return evaluation;
    };
    if !record.is_active {
        return evaluation;
    }
    let Some(period_end) = record.current_period_end else {
        return evaluation;
    };
    let Some(anchor) = record
        .last_credit_refill_date
        .or(record.current_period_start)
    else {
        return evaluation;
    };

    if let Some(due) = due_refills(anchor, period_end, now) {
        record.credits = plan.monthly_credit_allotment.max(0);
        record.last_credit_refill_date = Some(due.last_checkpoint);
        evaluation.refills_granted = due.count;
    }

    evaluation
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueRefills {
    pub count: u32,
    pub last_checkpoint: DateTime<Utc>,
}

/// Walks 30-day checkpoints from `anchor`, stopping at whichever comes first of
/// `now` and `period_end`. `None` when no checkpoint is due.
pub fn due_refills(
    anchor: DateTime<Utc>,
    period_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DueRefills> {
    let interval = Duration::days(REFILL_INTERVAL_DAYS);
    let mut due: Option<DueRefills> = None;
    let mut next = anchor + interval;

    while next <= now && next <= period_end {
        due = Some(DueRefills {
            count: due.map_or(1, |due| due.count + 1),
            last_checkpoint: next,
        });
        next += interval;
    }

    due
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    fn plan(plan_type: PlanType, allotment: i32) -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            name: plan_type.to_string(),
            external_price_id: format!("price_{plan_type}"),
            plan_type,
            monthly_credit_allotment: allotment,
            price_minor: 12_000,
            currency: "usd".to_string(),
            is_active: true,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn active(plan: &PlanEntity, period_end: DateTime<Utc>) -> EntitlementModel {
        let mut record = EntitlementModel::blank(Uuid::new_v4(), Uuid::new_v4());
        record.plan_id = Some(plan.id);
        record.external_subscription_id = Some("sub_1".to_string());
        record.status = SubscriptionStatus::Active;
        record.is_active = true;
        record.credits = 3;
        record.current_period_start = Some(t0());
        record.current_period_end = Some(period_end);
        record.last_credit_refill_date = Some(t0());
        record
    }

    #[test]
    fn elapsed_period_expires_record() {
        let monthly = plan(PlanType::Monthly, 50);
        let now = t0() + Duration::days(30);
        let mut record = active(&monthly, now - Duration::seconds(1));
        record.credits = 50;

        let evaluation = evaluate_access(&mut record, Some(&monthly), now);

        assert!(evaluation.expired);
        assert!(!record.is_active);
        assert_eq!(record.status, SubscriptionStatus::Ended);
        assert_eq!(record.credits, 0);
    }

    #[test]
    fn expiry_is_idempotent() {
        let monthly = plan(PlanType::Monthly, 50);
        let now = t0() + Duration::days(31);
        let mut record = active(&monthly, t0() + Duration::days(30));

        evaluate_access(&mut record, Some(&monthly), now);
        let after_first = record.clone();
        let second = evaluate_access(&mut record, Some(&monthly), now);

        assert!(!second.changed());
        assert_eq!(record, after_first);
    }

    #[test]
    fn lifetime_plan_never_expires() {
        let lifetime = plan(PlanType::Lifetime, 5);
        let mut record = active(&lifetime, t0() + Duration::days(1));

        let evaluation = evaluate_access(&mut record, Some(&lifetime), t0() + Duration::days(400));

        assert!(!evaluation.changed());
        assert!(record.is_active);
        assert_eq!(record.credits, 3);
    }

    #[test]
    fn record_without_period_end_is_left_alone() {
        let monthly = plan(PlanType::Monthly, 50);
        let mut record = active(&monthly, t0());
        record.current_period_end = None;

        let evaluation = evaluate_access(&mut record, Some(&monthly), t0() + Duration::days(90));

        assert!(!evaluation.changed());
        assert!(record.is_active);
    }

    #[test]
    fn checkpoints_stop_at_period_end() {
        let due = due_refills(t0(), t0() + Duration::days(45), t0() + Duration::days(100));

        assert_eq!(
            due,
            Some(DueRefills {
                count: 1,
                last_checkpoint: t0() + Duration::days(30),
            })
        );
    }

    #[test]
    fn no_checkpoint_due_before_thirty_days() {
        assert_eq!(
            due_refills(t0(), t0() + Duration::days(365), t0() + Duration::days(29)),
            None
        );
    }

    #[test]
    fn refill_inside_short_period_grants_once() {
        let yearly = plan(PlanType::Yearly, 80);
        let mut record = active(&yearly, t0() + Duration::days(45));

        let evaluation = evaluate_access(&mut record, Some(&yearly), t0() + Duration::days(44));

        assert_eq!(evaluation.refills_granted, 1);
        assert_eq!(record.credits, 80);
        assert_eq!(
            record.last_credit_refill_date,
            Some(t0() + Duration::days(30))
        );
    }

    #[test]
    fn yearly_plan_refills_every_thirty_days() {
        let yearly = plan(PlanType::Yearly, 80);
        let mut record = active(&yearly, t0() + Duration::days(365));

        let evaluation = evaluate_access(&mut record, Some(&yearly), t0() + Duration::days(95));

        assert_eq!(evaluation.refills_granted, 3);
        assert_eq!(record.credits, 80);
        assert_eq!(
            record.last_credit_refill_date,
            Some(t0() + Duration::days(90))
        );

        let again = evaluate_access(&mut record, Some(&yearly), t0() + Duration::days(95));
        assert!(!again.changed());
    }

    #[test]
    fn refill_anchors_on_period_start_when_never_refilled() {
        let monthly = plan(PlanType::Monthly, 50);
        let mut record = active(&monthly, t0() + Duration::days(60));
        record.last_credit_refill_date = None;

        let evaluation = evaluate_access(&mut record, Some(&monthly), t0() + Duration::days(31));

        assert_eq!(evaluation.refills_granted, 1);
        assert_eq!(
            record.last_credit_refill_date,
            Some(t0() + Duration::days(30))
        );
    }

    #[test]
    fn inactive_record_gets_no_refill() {
        let yearly = plan(PlanType::Yearly, 80);
        let mut record = active(&yearly, t0() + Duration::days(365));
        record.is_active = false;
        record.status = SubscriptionStatus::Paused;

        let evaluation = evaluate_access(&mut record, Some(&yearly), t0() + Duration::days(95));

        assert!(!evaluation.changed());
        assert_eq!(record.credits, 3);
    }
}
