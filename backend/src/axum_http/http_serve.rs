use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Extension, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use billing::{
    domain::repositories::{
        entitlements::EntitlementRepository, invoices::InvoiceRepository, plans::PlanRepository,
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            entitlements::EntitlementPostgres, invoices::InvoicePostgres, plans::PlanPostgres,
        },
    },
    payments::stripe_client::{StripeClient, StripeConfig},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    auth::JwtVerifier,
    axum_http::{default_routers, routers},
    config::config_model::DotEnvyConfig,
    usecases::{
        billing_webhooks::BillingWebhookUseCase,
        entitlements::EntitlementUseCase,
        stripe_gateway::StripeGateway,
        subscriptions::{CheckoutUrls, SubscriptionUseCase},
    },
};

/// Storage and provider adapters the routers are built on.
pub struct BillingServices<E, P, I, G> {
    pub entitlements: Arc<E>,
    pub plans: Arc<P>,
    pub invoices: Arc<I>,
    pub stripe: Arc<G>,
}

pub fn app<E, P, I, G>(config: &DotEnvyConfig, services: BillingServices<E, P, I, G>) -> Result<Router>
where
    E: EntitlementRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let entitlements_usecase = Arc::new(EntitlementUseCase::new(Arc::clone(&services.entitlements)));
    let subscriptions_usecase = Arc::new(SubscriptionUseCase::new(
        Arc::clone(&services.entitlements),
        Arc::clone(&services.plans),
        Arc::clone(&services.invoices),
        Arc::clone(&services.stripe),
        CheckoutUrls {
            success_url: config.checkout.success_url.clone(),
            cancel_url: config.checkout.cancel_url.clone(),
            payment_method_return_url: config.checkout.payment_method_return_url.clone(),
            plan_selection_url: config.redirects.plan_selection_url.clone(),
        },
    ));
    let webhooks_usecase = Arc::new(BillingWebhookUseCase::new(
        Arc::clone(&services.entitlements),
        Arc::clone(&services.plans),
        Arc::clone(&services.stripe),
    ));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/billing",
            routers::billing::routes(subscriptions_usecase, Arc::clone(&entitlements_usecase)),
        )
        .nest("/api/v1/credits", routers::credits::routes(entitlements_usecase))
        .nest("/api/v1/webhooks", routers::webhooks::routes(webhooks_usecase))
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(Arc::new(JwtVerifier::new(&config.identity_provider))))
        .layer(Extension(Arc::new(config.redirects.clone())))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let stripe = StripeClient::new(StripeConfig {
        secret_key: config.stripe.secret_key.clone(),
        webhook_secret: config.stripe.webhook_secret.clone(),
        api_base: config.stripe.api_base.clone(),
        webhook_tolerance_secs: config.stripe.webhook_tolerance_secs,
    })?;

    let app = app(
        &config,
        BillingServices {
            entitlements: Arc::new(EntitlementPostgres::new(Arc::clone(&db_pool))),
            plans: Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
            invoices: Arc::new(InvoicePostgres::new(Arc::clone(&db_pool))),
            stripe: Arc::new(stripe),
        },
    )?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = ?err, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = ?err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}

#[cfg(test)]
mod tests;
