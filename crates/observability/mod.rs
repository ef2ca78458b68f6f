mod alerts;
mod config;

use std::sync::Arc;

use alerts::{AlertDispatcher, AlertLayer, ChatWebhookSink};
use anyhow::Result;
use config::ObservabilityConfig;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber. Must run inside a tokio runtime when
/// alerting is configured, since the alert dispatcher spawns a task.
pub fn init_observability(component: &str) -> Result<()> {
    let mut config = ObservabilityConfig::from_env(component);

    let alert_layer = match config.alerts.as_ref() {
        Some(alerts) => match ChatWebhookSink::new(alerts.webhook_url.clone()) {
            Ok(sink) => {
                let dispatcher = AlertDispatcher::spawn(vec![Arc::new(sink)]);
                // Events below min_level still pass so `alert = true` can opt in.
                Some(
                    AlertLayer::new(dispatcher, config.service_context.clone(), alerts.min_level)
                        .with_filter(LevelFilter::INFO),
                )
            }
            Err(err) => {
                config
                    .warnings
                    .push(format!("alert sink disabled: {err:#}"));
                None
            }
        },
        None => None,
    };
    let alerts_enabled = alert_layer.is_some();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    let service = &config.service_context;
    for warning in &config.warnings {
        warn!(
            service = %service.service_name,
            environment = %service.environment,
            component = %service.component,
            %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %service.service_name,
        environment = %service.environment,
        component = %service.component,
        alerts_enabled,
        "observability: initialized"
    );

    Ok(())
}
