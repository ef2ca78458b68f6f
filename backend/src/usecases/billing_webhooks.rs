use std::sync::Arc;

use billing::{
    domain::{
        reconciliation::ResolvedPlans,
        repositories::{entitlements::EntitlementRepository, plans::PlanRepository},
        value_objects::{
            billing_errors::BillingError,
            billing_intents::{BillingIntent, NormalizedEvent, SubscriptionActivated},
            entitlements::{ENDED_SUBSCRIPTION_SENTINEL, TransitionOutcome},
            enums::subscription_statuses::SubscriptionStatus,
        },
    },
    payments::{event_normalizer::normalize_event, stripe_client::parse_event},
};
use chrono::Utc;
use tracing::{error, info, warn};

use super::stripe_gateway::StripeGateway;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { intent: &'static str },
    /// The invoice was already recorded by an earlier delivery.
    Duplicate { external_invoice_id: String },
    Ignored { event_type: String },
}

pub struct BillingWebhookUseCase<E, P, G>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    entitlement_repo: Arc<E>,
    plan_repo: Arc<P>,
    stripe: Arc<G>,
}

impl<E, P, G> BillingWebhookUseCase<E, P, G>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    pub fn new(entitlement_repo: Arc<E>, plan_repo: Arc<P>, stripe: Arc<G>) -> Self {
        Self {
            entitlement_repo,
            plan_repo,
            stripe,
        }
    }

    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(signature) = signature else {
            warn!("webhooks: missing signature header");
            return Err(BillingError::SignatureRejected);
        };
        if let Err(err) = self.stripe.verify_webhook_signature(payload, signature) {
            warn!(error = %err, "webhooks: signature verification failed");
            return Err(BillingError::SignatureRejected);
        }

        let event = parse_event(payload).map_err(|err| {
            error!(alert = true, error = %err, "webhooks: unparsable event body");
            BillingError::MalformedEvent(err.to_string())
        })?;
        let event_id = event.id.clone().unwrap_or_default();
        let event_type = event.type_.clone();

        let intent = match normalize_event(&event) {
            Ok(NormalizedEvent::Intent(intent)) => intent,
            Ok(NormalizedEvent::Unhandled { event_type }) => {
                info!(%event_id, %event_type, "webhooks: event type ignored");
                return Ok(WebhookOutcome::Ignored { event_type });
            }
            Err(err) => {
                error!(
                    alert = true,
                    %event_id,
                    %event_type,
                    error = %err,
                    "webhooks: malformed event"
                );
                return Err(err);
            }
        };

        let result = self.process(intent).await;
        match &result {
            Ok(outcome) => {
                info!(%event_id, %event_type, ?outcome, "webhooks: event processed");
            }
            Err(err @ BillingError::MalformedEvent(_)) => {
                error!(alert = true, %event_id, %event_type, error = %err, "webhooks: malformed event");
            }
            Err(err @ BillingError::SubscriptionConflict(_)) => {
                error!(
                    alert = true,
                    %event_id,
                    %event_type,
                    error = %err,
                    "webhooks: subscription held by another account"
                );
            }
            Err(err @ BillingError::NotFound(_)) => {
                warn!(%event_id, %event_type, error = %err, "webhooks: no matching entitlement");
            }
            Err(err) => {
                error!(%event_id, %event_type, error = ?err, "webhooks: event processing failed");
            }
        }
        result
    }

    async fn process(&self, intent: BillingIntent) -> Result<WebhookOutcome, BillingError> {
        let intent = match intent {
            BillingIntent::SubscriptionActivated(activated) => {
                BillingIntent::SubscriptionActivated(self.hydrate_activation(activated).await?)
            }
            other => other,
        };

        let resolved = self.resolve_plans(&intent).await?;
        let outcome = self
            .entitlement_repo
            .apply_intent(intent.clone(), resolved, Utc::now())
            .await?;

        match outcome {
            TransitionOutcome::Duplicate {
                external_invoice_id,
            } => {
                info!(%external_invoice_id, "webhooks: invoice already recorded");
                Ok(WebhookOutcome::Duplicate {
                    external_invoice_id,
                })
            }
            TransitionOutcome::Applied {
                entitlement,
                created,
                invoice_recorded,
            } => {
                info!(
                    account_id = %entitlement.account_id,
                    intent = intent.name(),
                    status = %entitlement.status,
                    credits = entitlement.credits,
                    created,
                    invoice_recorded,
                    "webhooks: intent applied"
                );

                if let BillingIntent::SubscriptionActivated(activated) = &intent {
                    self.cancel_replaced_subscription(activated).await?;
                }

                Ok(WebhookOutcome::Applied {
                    intent: intent.name(),
                })
            }
        }
    }

    /// Checkout payloads rarely carry status and period; take them from the subscription.
    async fn hydrate_activation(
        &self,
        mut activated: SubscriptionActivated,
    ) -> Result<SubscriptionActivated, BillingError> {
        if activated.status.is_some() && activated.period.is_some() {
            return Ok(activated);
        }

        let subscription = self
            .stripe
            .retrieve_subscription(&activated.external_subscription_id)
            .await
            .map_err(BillingError::ProviderError)?;

        if activated.status.is_none() {
            let raw = subscription.status.as_deref().unwrap_or_default();
            let status = SubscriptionStatus::from_provider(raw).ok_or_else(|| {
                BillingError::MalformedEvent(format!(
                    "subscription {} has unknown status {raw:?}",
                    subscription.id
                ))
            })?;
            activated.status = Some(status);
        }
        if activated.period.is_none() {
            let period = subscription.period().ok_or_else(|| {
                BillingError::MalformedEvent(format!(
                    "subscription {} has no valid billing period",
                    subscription.id
                ))
            })?;
            activated.period = Some(period);
        }

        Ok(activated)
    }

    async fn resolve_plans(&self, intent: &BillingIntent) -> Result<ResolvedPlans, BillingError> {
        let resolved = match intent {
            BillingIntent::SubscriptionActivated(activated) => ResolvedPlans {
                plan: self.plan_repo.find_by_id(activated.plan_id).await?,
                lifetime_plan: None,
            },
            BillingIntent::SubscriptionUpdated(updated) => {
                let plan = match updated.price_id.as_deref() {
                    Some(price_id) => {
                        let plan = self.plan_repo.find_active_by_price_id(price_id).await?;
                        if plan.is_none() {
                            warn!(
                                subscription_id = %updated.external_subscription_id,
                                %price_id,
                                "webhooks: price not in catalog, keeping current plan"
                            );
                        }
                        plan
                    }
                    None => None,
                };
                ResolvedPlans {
                    plan,
                    lifetime_plan: None,
                }
            }
            BillingIntent::SubscriptionCanceled(_) => ResolvedPlans {
                plan: None,
                lifetime_plan: self.plan_repo.find_lifetime_plan().await?,
            },
            _ => ResolvedPlans::default(),
        };

        Ok(resolved)
    }

    async fn cancel_replaced_subscription(
        &self,
        activated: &SubscriptionActivated,
    ) -> Result<(), BillingError> {
        let Some(old_subscription_id) = activated
            .replaces_subscription_id
            .as_deref()
            .filter(|old| *old != activated.external_subscription_id)
            .filter(|old| *old != ENDED_SUBSCRIPTION_SENTINEL)
        else {
            return Ok(());
        };

        match self.stripe.cancel_subscription(old_subscription_id).await {
            Ok(()) => {
                info!(
                    account_id = %activated.account_id,
                    %old_subscription_id,
                    "webhooks: replaced subscription canceled"
                );
                Ok(())
            }
            Err(cancel_err) => {
                // A redelivered activation finds the old subscription already gone.
                match self.stripe.retrieve_subscription(old_subscription_id).await {
                    Ok(old) if old.status.as_deref() == Some("canceled") => {
                        info!(%old_subscription_id, "webhooks: replaced subscription was already canceled");
                        Ok(())
                    }
                    _ => {
                        error!(
                            account_id = %activated.account_id,
                            %old_subscription_id,
                            error = ?cancel_err,
                            "webhooks: failed to cancel replaced subscription"
                        );
                        Err(BillingError::ProviderError(cancel_err))
                    }
                }
            }
        }
    }
}
