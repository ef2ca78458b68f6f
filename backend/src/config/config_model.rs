#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub stripe: Stripe,
    pub checkout: Checkout,
    pub identity_provider: IdentityProvider,
    pub redirects: Redirects,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    /// MiB
    pub body_limit: u64,
    /// Seconds
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub success_url: String,
    pub cancel_url: String,
    pub payment_method_return_url: String,
}

#[derive(Debug, Clone)]
pub struct IdentityProvider {
    pub jwt_secret: String,
    pub jwt_audience: String,
}

/// Safe landing pages for command errors.
#[derive(Debug, Clone)]
pub struct Redirects {
    pub plan_selection_url: String,
    pub dashboard_url: String,
}
