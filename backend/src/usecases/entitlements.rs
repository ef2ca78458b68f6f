use std::sync::Arc;

use billing::domain::{
    repositories::entitlements::EntitlementRepository,
    value_objects::{
        billing_errors::BillingError,
        entitlements::{EntitlementModel, SpendCreditsResponse, SpendOutcome},
    },
};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::subscriptions::UseCaseResult;

pub struct EntitlementUseCase<E>
where
    E: EntitlementRepository + Send + Sync + 'static,
{
    entitlement_repo: Arc<E>,
}

impl<E> EntitlementUseCase<E>
where
    E: EntitlementRepository + Send + Sync + 'static,
{
    pub fn new(entitlement_repo: Arc<E>) -> Self {
        Self { entitlement_repo }
    }

    /// Lazy expiry and refill, run before anything trusts the record.
    pub async fn refresh_on_access(&self, account_id: Uuid) -> UseCaseResult<Option<EntitlementModel>> {
        let entity = self
            .entitlement_repo
            .evaluate_access(account_id, Utc::now())
            .await
            .map_err(|err| {
                error!(%account_id, db_error = ?err, "entitlements: evaluation failed");
                BillingError::ProcessingError(err)
            })?;

        Ok(entity.map(EntitlementModel::try_from).transpose()?)
    }

    pub async fn spend_credits(
        &self,
        account_id: Uuid,
        amount: i32,
    ) -> UseCaseResult<SpendCreditsResponse> {
        if amount <= 0 {
            return Err(BillingError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }

        let outcome = self
            .entitlement_repo
            .spend_credits(account_id, amount)
            .await
            .map_err(|err| {
                error!(%account_id, amount, db_error = ?err, "entitlements: spend failed");
                BillingError::ProcessingError(err)
            })?;

        match outcome {
            SpendOutcome::Spent { remaining } => {
                info!(%account_id, amount, remaining, "entitlements: credits spent");
                Ok(SpendCreditsResponse {
                    spent: amount,
                    remaining,
                })
            }
            SpendOutcome::InsufficientCredits { available } => {
                warn!(%account_id, amount, available, "entitlements: insufficient credits");
                Err(BillingError::InsufficientCredits {
                    requested: amount,
                    available,
                })
            }
            SpendOutcome::NoActiveSubscription => {
                warn!(%account_id, amount, "entitlements: spend without active subscription");
                Err(BillingError::NoActiveSubscription)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing::domain::repositories::entitlements::MockEntitlementRepository;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn spend_reports_remaining_balance() {
        let account_id = Uuid::new_v4();
        let mut repo = MockEntitlementRepository::new();
        repo.expect_spend_credits()
            .with(eq(account_id), eq(30))
            .times(1)
            .returning(|_, _| Ok(SpendOutcome::Spent { remaining: 20 }));

        let usecase = EntitlementUseCase::new(Arc::new(repo));
        let response = usecase.spend_credits(account_id, 30).await.unwrap();

        assert_eq!(
            response,
            SpendCreditsResponse {
                spent: 30,
                remaining: 20
            }
        );
    }

    #[tokio::test]
    async fn spend_over_balance_is_insufficient() {
        let mut repo = MockEntitlementRepository::new();
        repo.expect_spend_credits()
            .returning(|_, _| Ok(SpendOutcome::InsufficientCredits { available: 20 }));

        let usecase = EntitlementUseCase::new(Arc::new(repo));
        let result = usecase.spend_credits(Uuid::new_v4(), 30).await;

        assert!(matches!(
            result,
            Err(BillingError::InsufficientCredits {
                requested: 30,
                available: 20
            })
        ));
    }

    #[tokio::test]
    async fn spend_without_subscription_is_rejected() {
        let mut repo = MockEntitlementRepository::new();
        repo.expect_spend_credits()
            .returning(|_, _| Ok(SpendOutcome::NoActiveSubscription));

        let usecase = EntitlementUseCase::new(Arc::new(repo));
        let result = usecase.spend_credits(Uuid::new_v4(), 1).await;

        assert!(matches!(result, Err(BillingError::NoActiveSubscription)));
    }

    #[tokio::test]
    async fn non_positive_amount_never_reaches_storage() {
        let mut repo = MockEntitlementRepository::new();
        repo.expect_spend_credits().never();

        let usecase = EntitlementUseCase::new(Arc::new(repo));

        assert!(matches!(
            usecase.spend_credits(Uuid::new_v4(), 0).await,
            Err(BillingError::InvalidRequest(_))
        ));
        assert!(matches!(
            usecase.spend_credits(Uuid::new_v4(), -5).await,
            Err(BillingError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn refresh_runs_lazy_evaluation_for_caller() {
        let account_id = Uuid::new_v4();
        let mut repo = MockEntitlementRepository::new();
        repo.expect_evaluate_access()
            .withf(move |id, _| *id == account_id)
            .times(1)
            .returning(|_, _| Ok(None));

        let usecase = EntitlementUseCase::new(Arc::new(repo));

        assert!(usecase.refresh_on_access(account_id).await.unwrap().is_none());
    }
}
