use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Expected correlation (record, subscription, session) is missing.
    #[error("not found: {0}")]
    NotFound(String),
    /// Provider payload lacks fields required to act on it.
    #[error("malformed billing event: {0}")]
    MalformedEvent(String),
    #[error("webhook signature rejected")]
    SignatureRejected,
    #[error("billing provider request failed")]
    ProviderError(#[source] anyhow::Error),
    #[error("insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i32, available: i32 },
    #[error("no active subscription")]
    NoActiveSubscription,
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The subscription id is already live on another account.
    #[error("subscription conflict: {0}")]
    SubscriptionConflict(String),
    #[error(transparent)]
    ProcessingError(#[from] anyhow::Error),
}

impl BillingError {
    /// Terminal outcomes are acknowledged to the provider; retrying the same event cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BillingError::NotFound(_)
                | BillingError::MalformedEvent(_)
                | BillingError::InvalidRequest(_)
                | BillingError::SubscriptionConflict(_)
        )
    }
}

impl From<diesel::result::Error> for BillingError {
    fn from(value: diesel::result::Error) -> Self {
        BillingError::ProcessingError(value.into())
    }
}
