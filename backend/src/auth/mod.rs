use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::config_model::IdentityProvider;

/// Claims issued by the external identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: Option<String>,
    pub aud: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub account_id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidHeader,
    #[error("Invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("Invalid account id in token")]
    InvalidSubject,
    #[error("Token verifier is not configured")]
    VerifierMissing,
}

/// Verifies the identity provider's HS256 tokens. Built once from config and
/// shared through request extensions.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &IdentityProvider) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.jwt_audience.as_str()]);

        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let token_data = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map_err(AuthError::InvalidToken)?;

        let account_id =
            Uuid::parse_str(&token_data.claims.sub).map_err(|_| AuthError::InvalidSubject)?;

        Ok(AuthUser {
            account_id,
            email: token_data.claims.email,
        })
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?;

    let value = header.to_str().map_err(|_| AuthError::InvalidHeader)?;

    value
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidHeader)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The refresh middleware may have already verified this request.
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let verifier = parts
            .extensions
            .get::<Arc<JwtVerifier>>()
            .cloned()
            .ok_or_else(|| unauthorized(AuthError::VerifierMissing))?;

        let token = bearer_token(parts).map_err(unauthorized)?;
        let user = verifier.verify(token).map_err(unauthorized)?;

        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

fn unauthorized(err: AuthError) -> (StatusCode, String) {
    debug!(error = ?err, "auth: request rejected");
    (StatusCode::UNAUTHORIZED, format!("Unauthorized: {err}"))
}

#[cfg(test)]
mod tests;
