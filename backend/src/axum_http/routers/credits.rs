use std::sync::Arc;

use axum::{
    Extension, Json, Router, middleware,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use billing::domain::{
    repositories::entitlements::EntitlementRepository,
    value_objects::entitlements::{CreditBalanceDto, SpendCreditsRequest},
};

use crate::{
    auth::AuthUser,
    axum_http::{
        error_responses::AppError,
        middleware::{CurrentEntitlement, refresh_entitlement, require_active_entitlement},
    },
    config::config_model::Redirects,
    usecases::entitlements::EntitlementUseCase,
};

pub fn routes<E>(entitlements_usecase: Arc<EntitlementUseCase<E>>) -> Router
where
    E: EntitlementRepository + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(balance))
        .route("/spend", post(spend))
        .route_layer(middleware::from_fn(require_active_entitlement))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&entitlements_usecase),
            refresh_entitlement::<E>,
        ))
        .with_state(entitlements_usecase)
}

pub async fn balance(Extension(current): Extension<CurrentEntitlement>) -> impl IntoResponse {
    let (credits, is_active) = current
        .0
        .as_ref()
        .map_or((0, false), |record| (record.credits, record.is_active));

    Json(CreditBalanceDto { credits, is_active })
}

pub async fn spend<E>(
    State(usecase): State<Arc<EntitlementUseCase<E>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
    Json(request): Json<SpendCreditsRequest>,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
{
    let response = usecase
        .spend_credits(auth.account_id, request.amount)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    Ok(Json(response))
}
