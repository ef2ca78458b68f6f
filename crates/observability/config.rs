use std::env;
use tracing::Level;
use url::Url;

#[derive(Debug, Clone)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

#[derive(Debug, Clone)]
pub(crate) struct AlertConfig {
    pub(crate) webhook_url: Url,
    pub(crate) min_level: Level,
}

#[derive(Debug, Clone)]
pub(crate) struct ObservabilityConfig {
    pub(crate) service_context: ServiceContext,
    pub(crate) alerts: Option<AlertConfig>,
    /// Parse problems, logged once the subscriber is installed.
    pub(crate) warnings: Vec<String>,
}

impl ObservabilityConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        Self::from_lookup(component, |key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(component: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let component = component.trim().to_string();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let service_context = ServiceContext {
            service_name: non_empty("SERVICE_NAME").unwrap_or_else(|| component.clone()),
            environment: non_empty("STAGE").unwrap_or_else(|| "unknown".to_string()),
            component,
        };

        let mut warnings = Vec::new();
        let alerts = alerts_from_lookup(&non_empty, &mut warnings);

        Self {
            service_context,
            alerts,
            warnings,
        }
    }
}

fn alerts_from_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    warnings: &mut Vec<String>,
) -> Option<AlertConfig> {
    let enabled = match lookup("ALERT_NOTIFY_ENABLED") {
        Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
            warnings.push(format!(
                "ALERT_NOTIFY_ENABLED is not a boolean (value: {raw}); alerts stay enabled"
            ));
            true
        }),
        None => true,
    };
    if !enabled {
        return None;
    }

    let raw_url = lookup("ALERT_WEBHOOK_URL")?;
    let webhook_url = match Url::parse(&raw_url) {
        Ok(url) => url,
        Err(err) => {
            // The URL embeds a token, so only the parse error is reported.
            warnings.push(format!(
                "ALERT_WEBHOOK_URL is invalid; alerts disabled (parse error: {err})"
            ));
            return None;
        }
    };

    let min_level = match lookup("ALERT_NOTIFY_LEVEL") {
        Some(raw) => parse_level(&raw).unwrap_or_else(|| {
            warnings.push(format!(
                "ALERT_NOTIFY_LEVEL is invalid (value: {raw}); using ERROR"
            ));
            Level::ERROR
        }),
        None => Level::ERROR,
    };

    Some(AlertConfig {
        webhook_url,
        min_level,
    })
}

fn parse_level(input: &str) -> Option<Level> {
    match input.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ObservabilityConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservabilityConfig::from_lookup("backend", move |key| vars.get(key).cloned())
    }

    #[test]
    fn service_name_defaults_to_component() {
        let config = config(&[]);

        assert_eq!(config.service_context.service_name, "backend");
        assert_eq!(config.service_context.environment, "unknown");
        assert!(config.alerts.is_none());
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn alerts_enabled_with_valid_url() {
        let config = config(&[
            ("ALERT_WEBHOOK_URL", "https://chat.example/hooks/abc"),
            ("ALERT_NOTIFY_LEVEL", "warn"),
        ]);

        let alerts = config.alerts.unwrap();
        assert_eq!(alerts.min_level, Level::WARN);
    }

    #[test]
    fn invalid_url_disables_alerts_with_warning() {
        let config = config(&[("ALERT_WEBHOOK_URL", "not a url")]);

        assert!(config.alerts.is_none());
        assert_eq!(config.warnings.len(), 1);
        assert!(!config.warnings[0].contains("not a url"));
    }

    #[test]
    fn explicit_disable_wins() {
        let config = config(&[
            ("ALERT_WEBHOOK_URL", "https://chat.example/hooks/abc"),
            ("ALERT_NOTIFY_ENABLED", "false"),
        ]);

        assert!(config.alerts.is_none());
    }

    #[test]
    fn bad_level_falls_back_to_error() {
        let config = config(&[
            ("ALERT_WEBHOOK_URL", "https://chat.example/hooks/abc"),
            ("ALERT_NOTIFY_LEVEL", "loud"),
        ]);

        assert_eq!(config.alerts.unwrap().min_level, Level::ERROR);
        assert_eq!(config.warnings.len(), 1);
    }
}
