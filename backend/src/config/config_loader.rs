use std::{env, str::FromStr};

use anyhow::{Context, Result};
use billing::payments::stripe_client::{DEFAULT_API_BASE, DEFAULT_WEBHOOK_TOLERANCE_SECS};

use super::config_model::{
    BackendServer, Checkout, Database, DotEnvyConfig, IdentityProvider, Redirects, Stripe,
};

const DEFAULT_JWT_AUDIENCE: &str = "authenticated";

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| env::var(key).ok())
}

pub(crate) fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<DotEnvyConfig> {
    let required = |key: &str| -> Result<String> {
        lookup(key)
            .filter(|value| !value.trim().is_empty())
            .with_context(|| format!("{key} is missing"))
    };
    let optional = |key: &str, default: &str| -> String {
        lookup(key)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    let backend_server = BackendServer {
        port: parse(&required("SERVER_PORT_BACKEND")?, "SERVER_PORT_BACKEND")?,
        body_limit: parse(&required("SERVER_BODY_LIMIT")?, "SERVER_BODY_LIMIT")?,
        timeout: parse(&required("SERVER_TIMEOUT")?, "SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
    };

    let stripe = Stripe {
        secret_key: required("STRIPE_SECRET_KEY")?,
        webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
        api_base: optional("STRIPE_API_BASE", DEFAULT_API_BASE),
        webhook_tolerance_secs: parse(
            &optional(
                "STRIPE_WEBHOOK_TOLERANCE_SECS",
                &DEFAULT_WEBHOOK_TOLERANCE_SECS.to_string(),
            ),
            "STRIPE_WEBHOOK_TOLERANCE_SECS",
        )?,
    };

    let checkout = Checkout {
        success_url: required("CHECKOUT_SUCCESS_URL")?,
        cancel_url: required("CHECKOUT_CANCEL_URL")?,
        payment_method_return_url: required("PAYMENT_METHOD_RETURN_URL")?,
    };

    let identity_provider = IdentityProvider {
        jwt_secret: required("IDP_JWT_SECRET")?,
        jwt_audience: optional("IDP_JWT_AUDIENCE", DEFAULT_JWT_AUDIENCE),
    };

    let redirects = Redirects {
        plan_selection_url: required("PLAN_SELECTION_URL")?,
        dashboard_url: required("DASHBOARD_URL")?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        stripe,
        checkout,
        identity_provider,
        redirects,
    })
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} is invalid"))
}
