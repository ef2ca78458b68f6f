use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use billing::domain::{
    repositories::{
        entitlements::EntitlementRepository, invoices::InvoiceRepository, plans::PlanRepository,
    },
    value_objects::entitlements::{CheckoutRequest, CheckoutSessionQuery},
};

use crate::{
    auth::AuthUser,
    axum_http::{error_responses::AppError, middleware::refresh_entitlement},
    config::config_model::Redirects,
    usecases::{
        entitlements::EntitlementUseCase,
        stripe_gateway::StripeGateway,
        subscriptions::{Customer, SubscriptionUseCase},
    },
};

pub fn routes<E, P, I, G>(
    subscriptions_usecase: Arc<SubscriptionUseCase<E, P, I, G>>,
    entitlements_usecase: Arc<EntitlementUseCase<E>>,
) -> Router
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    Router::new()
        .route("/plans", get(list_plans))
        .route("/dashboard", get(dashboard))
        .route("/subscribe", post(subscribe))
        .route("/change-plan", post(change_plan))
        .route("/checkout/success", get(checkout_success))
        .route("/checkout/cancel", get(checkout_cancel))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/payment-method", post(update_payment_method))
        .route_layer(middleware::from_fn_with_state(
            entitlements_usecase,
            refresh_entitlement::<E>,
        ))
        .with_state(subscriptions_usecase)
}

fn customer(auth: &AuthUser) -> Customer {
    Customer {
        account_id: auth.account_id,
        email: auth.email.clone(),
    }
}

pub async fn list_plans<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    _auth: AuthUser,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let plans = usecase
        .list_plans()
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok(Json(plans))
}

pub async fn dashboard<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let dashboard = usecase
        .dashboard(auth.account_id)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok(Json(dashboard))
}

pub async fn subscribe<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let session = usecase
        .subscribe(&customer(&auth), &request.price_id)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn change_plan<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let session = usecase
        .change_or_create_checkout(&customer(&auth), &request.price_id)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn checkout_success<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
    Query(query): Query<CheckoutSessionQuery>,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let confirmation = usecase
        .confirm_success(auth.account_id, &query.session_id)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok(Json(confirmation))
}

pub async fn checkout_cancel<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    auth: AuthUser,
    Query(query): Query<CheckoutSessionQuery>,
) -> impl IntoResponse
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    Json(usecase.cancel_flow(auth.account_id, &query.session_id).await)
}

pub async fn pause<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    usecase
        .pause(auth.account_id)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    // Final state arrives with the subscription.updated webhook.
    Ok(StatusCode::ACCEPTED)
}

pub async fn resume<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    usecase
        .resume(auth.account_id)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn update_payment_method<E, P, I, G>(
    State(usecase): State<Arc<SubscriptionUseCase<E, P, I, G>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let session = usecase
        .update_payment_method(&customer(&auth))
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok((StatusCode::CREATED, Json(session)))
}
