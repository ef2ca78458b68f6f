use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use billing::domain::repositories::{
    entitlements::EntitlementRepository, plans::PlanRepository,
};
use serde_json::json;

use crate::{
    axum_http::error_responses::AppError,
    usecases::{
        billing_webhooks::{BillingWebhookUseCase, WebhookOutcome},
        stripe_gateway::StripeGateway,
    },
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn routes<E, P, G>(webhooks_usecase: Arc<BillingWebhookUseCase<E, P, G>>) -> Router
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    Router::new()
        .route("/stripe", post(stripe_webhook))
        .with_state(webhooks_usecase)
}

/// Unauthenticated; the signature header is the only proof of origin.
pub async fn stripe_webhook<E, P, G>(
    State(usecase): State<Arc<BillingWebhookUseCase<E, P, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = usecase
        .handle(&body, signature)
        .await
        .map_err(AppError::Webhook)?;

    let outcome = match outcome {
        WebhookOutcome::Applied { intent } => json!({ "outcome": "applied", "intent": intent }),
        WebhookOutcome::Duplicate {
            external_invoice_id,
        } => json!({ "outcome": "duplicate", "invoice": external_invoice_id }),
        WebhookOutcome::Ignored { event_type } => {
            json!({ "outcome": "ignored", "event_type": event_type })
        }
    };

    Ok(Json(json!({ "received": true, "result": outcome })))
}
