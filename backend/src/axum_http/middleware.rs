use std::sync::Arc;

use axum::{
    Extension,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use billing::domain::{
    repositories::entitlements::EntitlementRepository,
    value_objects::{billing_errors::BillingError, entitlements::EntitlementModel},
};

use crate::{
    auth::AuthUser,
    axum_http::error_responses::AppError,
    config::config_model::Redirects,
    usecases::entitlements::EntitlementUseCase,
};

/// The caller's record after lazy expiry and refill ran for this request.
#[derive(Debug, Clone)]
pub struct CurrentEntitlement(pub Option<EntitlementModel>);

impl CurrentEntitlement {
    pub fn is_active(&self) -> bool {
        self.0.as_ref().is_some_and(|record| record.is_active)
    }
}

pub async fn refresh_entitlement<E>(
    State(usecase): State<Arc<EntitlementUseCase<E>>>,
    Extension(redirects): Extension<Arc<Redirects>>,
    auth: AuthUser,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
{
    let record = usecase
        .refresh_on_access(auth.account_id)
        .await
        .map_err(|err| AppError::command(err, &redirects))?;

    request.extensions_mut().insert(CurrentEntitlement(record));
    Ok(next.run(request).await)
}

/// Must sit inside [`refresh_entitlement`]; a request it never saw is treated as inactive.
pub async fn require_active_entitlement(
    Extension(redirects): Extension<Arc<Redirects>>,
    current: Option<Extension<CurrentEntitlement>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let active = current.is_some_and(|Extension(current)| current.is_active());
    if !active {
        return Err(AppError::command(
            BillingError::NoActiveSubscription,
            &redirects,
        ));
    }

    Ok(next.run(request).await)
}
