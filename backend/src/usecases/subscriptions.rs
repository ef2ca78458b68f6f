use std::{collections::HashMap, sync::Arc};

use billing::{
    domain::{
        entities::plans::PlanEntity,
        repositories::{
            entitlements::EntitlementRepository, invoices::InvoiceRepository,
            plans::PlanRepository,
        },
        value_objects::{
            billing_errors::BillingError,
            entitlements::{
                CheckoutAbandonedDto, CheckoutConfirmationDto, CheckoutSessionDto, DashboardDto,
                EntitlementDto, EntitlementModel, InvoiceDto,
            },
            enums::checkout_modes::CheckoutMode,
            plans::PlanDto,
        },
    },
    payments::{
        event_normalizer::{
            METADATA_ACCOUNT_ID, METADATA_OLD_SUBSCRIPTION_ID, METADATA_PLAN_ID, METADATA_PRICE_ID,
        },
        stripe_client::{CheckoutSessionRequest, SubscriptionModification},
    },
};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::stripe_gateway::StripeGateway;

pub type UseCaseResult<T> = std::result::Result<T, BillingError>;

const CHECKOUT_SESSION_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";
/// Invoices stay open and no charge is attempted while paused.
const PAUSE_BEHAVIOR: &str = "mark_uncollectible";

#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
    pub payment_method_return_url: String,
    pub plan_selection_url: String,
}

/// Caller identity as the command handlers need it.
#[derive(Debug, Clone)]
pub struct Customer {
    pub account_id: Uuid,
    pub email: Option<String>,
}

pub struct SubscriptionUseCase<E, P, I, G>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    entitlement_repo: Arc<E>,
    plan_repo: Arc<P>,
    invoice_repo: Arc<I>,
    stripe: Arc<G>,
    urls: CheckoutUrls,
}

impl<E, P, I, G> SubscriptionUseCase<E, P, I, G>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    pub fn new(
        entitlement_repo: Arc<E>,
        plan_repo: Arc<P>,
        invoice_repo: Arc<I>,
        stripe: Arc<G>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            entitlement_repo,
            plan_repo,
            invoice_repo,
            stripe,
            urls,
        }
    }

    pub async fn list_plans(&self) -> UseCaseResult<Vec<PlanDto>> {
        let plans = self.plan_repo.list_active_plans().await.map_err(|err| {
            error!(db_error = ?err, "subscriptions: failed to list active plans");
            BillingError::ProcessingError(err)
        })?;

        let plan_count = plans.len();
        info!(plan_count, "subscriptions: active plans loaded");
        Ok(plans.into_iter().map(PlanDto::from).collect())
    }

    /// First-time checkout. Refused while a subscription is active; plan changes
    /// go through [`Self::change_or_create_checkout`].
    pub async fn subscribe(
        &self,
        customer: &Customer,
        price_id: &str,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let account_id = customer.account_id;
        info!(%account_id, %price_id, "subscriptions: subscribe requested");

        let plan = self.purchasable_plan(price_id).await?;
        let record = self.load_record(account_id).await?;

        if record.as_ref().is_some_and(|record| record.is_active) {
            warn!(%account_id, "subscriptions: subscribe refused, already active");
            return Err(BillingError::InvalidPlan(
                "account already has an active subscription".to_string(),
            ));
        }

        self.open_subscription_checkout(customer, &plan, record.as_ref(), None)
            .await
    }

    /// Checkout for a new plan. When an active subscription exists its id rides
    /// along in the metadata so the webhook cancels it once the new one is live.
    pub async fn change_or_create_checkout(
        &self,
        customer: &Customer,
        price_id: &str,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let account_id = customer.account_id;
        info!(%account_id, %price_id, "subscriptions: plan change requested");

        let plan = self.purchasable_plan(price_id).await?;
        let record = self.load_record(account_id).await?;

        let replaces = match record.as_ref() {
            Some(record) if record.is_active => {
                if record.plan_id == Some(plan.id) {
                    return Err(BillingError::InvalidPlan(format!(
                        "already subscribed to {}",
                        plan.name
                    )));
                }
                record.live_subscription_id().map(str::to_string)
            }
            _ => None,
        };

        self.open_subscription_checkout(customer, &plan, record.as_ref(), replaces)
            .await
    }

    /// Read-only: the webhook is the authority on what the session changed.
    pub async fn confirm_success(
        &self,
        account_id: Uuid,
        session_id: &str,
    ) -> UseCaseResult<CheckoutConfirmationDto> {
        let session = self
            .stripe
            .retrieve_checkout_session(session_id)
            .await
            .map_err(|err| {
                error!(%account_id, %session_id, error = ?err, "subscriptions: failed to load checkout session");
                BillingError::ProviderError(err)
            })?;

        let owner = session.metadata.get(METADATA_ACCOUNT_ID);
        if owner.map(String::as_str) != Some(account_id.to_string().as_str()) {
            warn!(%account_id, %session_id, "subscriptions: checkout session belongs to another account");
            return Err(BillingError::InvalidRequest(
                "checkout session does not belong to this account".to_string(),
            ));
        }

        info!(
            %account_id,
            %session_id,
            status = session.status.as_deref().unwrap_or("unknown"),
            "subscriptions: checkout confirmed"
        );

        Ok(CheckoutConfirmationDto {
            session_id: session.id,
            mode: session.mode,
            status: session.status,
            payment_status: session.payment_status,
        })
    }

    pub async fn cancel_flow(&self, account_id: Uuid, session_id: &str) -> CheckoutAbandonedDto {
        info!(%account_id, %session_id, "subscriptions: checkout abandoned");

        CheckoutAbandonedDto {
            session_id: session_id.to_string(),
            redirect: self.urls.plan_selection_url.clone(),
        }
    }

    pub async fn pause(&self, account_id: Uuid) -> UseCaseResult<()> {
        let record = self.load_record(account_id).await?;
        let Some(subscription_id) = record
            .as_ref()
            .filter(|record| record.is_active && !record.is_paused)
            .and_then(|record| record.live_subscription_id())
        else {
            return Err(BillingError::NoActiveSubscription);
        };

        self.stripe
            .modify_subscription(
                subscription_id,
                SubscriptionModification::PauseCollection {
                    behavior: PAUSE_BEHAVIOR.to_string(),
                },
            )
            .await
            .map_err(|err| {
                error!(%account_id, %subscription_id, error = ?err, "subscriptions: provider pause failed");
                BillingError::ProviderError(err)
            })?;

        self.entitlement_repo
            .mark_paused(account_id)
            .await
            .map_err(|err| {
                error!(%account_id, db_error = ?err, "subscriptions: failed to mark paused");
                BillingError::ProcessingError(err)
            })?;

        info!(%account_id, %subscription_id, "subscriptions: paused");
        Ok(())
    }

    pub async fn resume(&self, account_id: Uuid) -> UseCaseResult<()> {
        let record = self.load_record(account_id).await?;
        let Some(subscription_id) = record
            .as_ref()
            .filter(|record| record.is_paused)
            .and_then(|record| record.live_subscription_id())
        else {
            return Err(BillingError::NoActiveSubscription);
        };

        let subscription = self
            .stripe
            .modify_subscription(subscription_id, SubscriptionModification::ResumeCollection)
            .await
            .map_err(|err| {
                error!(%account_id, %subscription_id, error = ?err, "subscriptions: provider resume failed");
                BillingError::ProviderError(err)
            })?;

        let period = subscription.period();
        if period.is_none() {
            warn!(%account_id, %subscription_id, "subscriptions: resumed subscription has no period, keeping stored one");
        }

        self.entitlement_repo
            .mark_resumed(account_id, period)
            .await
            .map_err(|err| {
                error!(%account_id, db_error = ?err, "subscriptions: failed to mark resumed");
                BillingError::ProcessingError(err)
            })?;

        info!(%account_id, %subscription_id, "subscriptions: resumed");
        Ok(())
    }

    /// Opens a setup-mode session for the existing billing customer.
    pub async fn update_payment_method(
        &self,
        customer: &Customer,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let account_id = customer.account_id;
        let record = self.load_record(account_id).await?;
        let Some(customer_id) = record.and_then(|record| record.external_customer_id) else {
            return Err(BillingError::InvalidRequest(
                "account has no billing customer yet".to_string(),
            ));
        };

        let request = CheckoutSessionRequest {
            mode: CheckoutMode::Setup,
            price_id: None,
            customer_id: Some(customer_id),
            customer_email: None,
            success_url: self.urls.payment_method_return_url.clone(),
            cancel_url: self.urls.payment_method_return_url.clone(),
            metadata: HashMap::from([(METADATA_ACCOUNT_ID.to_string(), account_id.to_string())]),
        };

        self.create_session(account_id, request).await
    }

    pub async fn dashboard(&self, account_id: Uuid) -> UseCaseResult<DashboardDto> {
        let entity = self
            .entitlement_repo
            .evaluate_access(account_id, Utc::now())
            .await
            .map_err(|err| {
                error!(%account_id, db_error = ?err, "subscriptions: failed to evaluate entitlement");
                BillingError::ProcessingError(err)
            })?;

        let Some(entity) = entity else {
            return Ok(DashboardDto {
                entitlement: EntitlementDto::empty(),
                invoices: Vec::new(),
            });
        };
        let record = EntitlementModel::try_from(entity)?;

        let plan = match record.plan_id {
            Some(plan_id) => self.plan_repo.find_by_id(plan_id).await.map_err(|err| {
                error!(%account_id, %plan_id, db_error = ?err, "subscriptions: failed to load plan");
                BillingError::ProcessingError(err)
            })?,
            None => None,
        };

        let invoices = self
            .invoice_repo
            .list_by_account_id(account_id)
            .await
            .map_err(|err| {
                error!(%account_id, db_error = ?err, "subscriptions: failed to list invoices");
                BillingError::ProcessingError(err)
            })?;

        Ok(DashboardDto {
            entitlement: EntitlementDto::from_model(&record, plan),
            invoices: invoices.into_iter().map(InvoiceDto::from).collect(),
        })
    }

    async fn purchasable_plan(&self, price_id: &str) -> UseCaseResult<PlanEntity> {
        let plan = self
            .plan_repo
            .find_active_by_price_id(price_id)
            .await
            .map_err(|err| {
                error!(%price_id, db_error = ?err, "subscriptions: failed to load plan");
                BillingError::ProcessingError(err)
            })?
            .ok_or_else(|| BillingError::InvalidPlan(format!("unknown price {price_id}")))?;

        if !plan.plan_type.is_recurring() {
            return Err(BillingError::InvalidPlan(format!(
                "{} cannot be purchased",
                plan.name
            )));
        }

        Ok(plan)
    }

    async fn load_record(&self, account_id: Uuid) -> UseCaseResult<Option<EntitlementModel>> {
        let entity = self
            .entitlement_repo
            .find_by_account_id(account_id)
            .await
            .map_err(|err| {
                error!(%account_id, db_error = ?err, "subscriptions: failed to load entitlement");
                BillingError::ProcessingError(err)
            })?;

        Ok(entity.map(EntitlementModel::try_from).transpose()?)
    }

    async fn open_subscription_checkout(
        &self,
        customer: &Customer,
        plan: &PlanEntity,
        record: Option<&EntitlementModel>,
        replaces_subscription_id: Option<String>,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let mut metadata = HashMap::from([
            (METADATA_ACCOUNT_ID.to_string(), customer.account_id.to_string()),
            (METADATA_PLAN_ID.to_string(), plan.id.to_string()),
            (METADATA_PRICE_ID.to_string(), plan.external_price_id.clone()),
        ]);
        if let Some(old) = replaces_subscription_id {
            metadata.insert(METADATA_OLD_SUBSCRIPTION_ID.to_string(), old);
        }

        let customer_id = record.and_then(|record| record.external_customer_id.clone());
        let request = CheckoutSessionRequest {
            mode: CheckoutMode::Subscription,
            price_id: Some(plan.external_price_id.clone()),
            customer_email: customer_id
                .is_none()
                .then(|| customer.email.clone())
                .flatten(),
            customer_id,
            success_url: with_session_placeholder(&self.urls.success_url),
            cancel_url: with_session_placeholder(&self.urls.cancel_url),
            metadata,
        };

        self.create_session(customer.account_id, request).await
    }

    async fn create_session(
        &self,
        account_id: Uuid,
        request: CheckoutSessionRequest,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let mode = request.mode;
        let session = self
            .stripe
            .create_checkout_session(request)
            .await
            .map_err(|err| {
                error!(%account_id, %mode, error = ?err, "subscriptions: failed to create checkout session");
                BillingError::ProviderError(err)
            })?;

        info!(%account_id, %mode, session_id = %session.id, "subscriptions: checkout session created");
        Ok(CheckoutSessionDto {
            session_id: session.id,
            checkout_url: session.url,
        })
    }
}

/// The provider substitutes the placeholder with the real session id on redirect.
fn with_session_placeholder(url: &str) -> String {
    if url.contains(CHECKOUT_SESSION_PLACEHOLDER) {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}session_id={CHECKOUT_SESSION_PLACEHOLDER}")
}
