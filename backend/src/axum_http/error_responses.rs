use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use billing::domain::value_objects::billing_errors::BillingError;
use serde::Serialize;
use thiserror::Error;

use crate::config::config_model::Redirects;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    /// A failed user command; degrades to a message plus a safe redirect.
    #[error("{error}")]
    Command {
        error: BillingError,
        redirect: String,
    },

    /// A failed webhook delivery; the status decides whether the provider retries.
    #[error("{0}")]
    Webhook(BillingError),
}

impl AppError {
    pub fn command(error: BillingError, redirects: &Redirects) -> Self {
        let redirect = match error {
            BillingError::InvalidPlan(_) | BillingError::NoActiveSubscription => {
                redirects.plan_selection_url.clone()
            }
            _ => redirects.dashboard_url.clone(),
        };

        AppError::Command { error, redirect }
    }
}

pub fn error_kind(error: &BillingError) -> &'static str {
    match error {
        BillingError::NotFound(_) => "not_found",
        BillingError::MalformedEvent(_) => "malformed_event",
        BillingError::SignatureRejected => "signature_rejected",
        BillingError::ProviderError(_) => "provider_error",
        BillingError::InsufficientCredits { .. } => "insufficient_credits",
        BillingError::NoActiveSubscription => "no_active_subscription",
        BillingError::InvalidPlan(_) => "invalid_plan",
        BillingError::InvalidRequest(_) => "invalid_request",
        BillingError::SubscriptionConflict(_) => "subscription_conflict",
        BillingError::ProcessingError(_) => "processing_error",
    }
}

pub fn command_status(error: &BillingError) -> StatusCode {
    match error {
        BillingError::NotFound(_) => StatusCode::NOT_FOUND,
        BillingError::MalformedEvent(_)
        | BillingError::InvalidPlan(_)
        | BillingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BillingError::SignatureRejected => StatusCode::UNAUTHORIZED,
        BillingError::InsufficientCredits { .. } | BillingError::SubscriptionConflict(_) => {
            StatusCode::CONFLICT
        }
        BillingError::NoActiveSubscription => StatusCode::PAYMENT_REQUIRED,
        BillingError::ProviderError(_) => StatusCode::BAD_GATEWAY,
        BillingError::ProcessingError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 4xx for terminal outcomes so the provider stops redelivering, 5xx otherwise.
pub fn webhook_status(error: &BillingError) -> StatusCode {
    match error {
        BillingError::SignatureRejected => StatusCode::UNAUTHORIZED,
        BillingError::NotFound(_) => StatusCode::NOT_FOUND,
        BillingError::MalformedEvent(_) | BillingError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        BillingError::SubscriptionConflict(_) => StatusCode::CONFLICT,
        BillingError::ProviderError(_) => StatusCode::BAD_GATEWAY,
        BillingError::InvalidPlan(_)
        | BillingError::ProcessingError(_)
        | BillingError::InsufficientCredits { .. }
        | BillingError::NoActiveSubscription => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn public_message(error: &BillingError) -> String {
    match error {
        BillingError::ProviderError(_) => {
            "The billing provider is unavailable, please try again".to_string()
        }
        BillingError::ProcessingError(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Command { error, redirect } => {
                let status = command_status(&error);
                (
                    status,
                    ErrorResponse {
                        code: status.as_u16(),
                        error: error_kind(&error),
                        message: public_message(&error),
                        redirect: Some(redirect),
                    },
                )
            }
            AppError::Webhook(error) => {
                let status = webhook_status(&error);
                (
                    status,
                    ErrorResponse {
                        code: status.as_u16(),
                        error: error_kind(&error),
                        message: public_message(&error),
                        redirect: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
