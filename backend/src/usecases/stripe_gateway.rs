use anyhow::Result;
use async_trait::async_trait;
use billing::payments::stripe_client::{
    CheckoutSessionRequest, CreatedCheckoutSession, StripeCheckoutSession, StripeClient,
    StripeSubscription, SubscriptionModification,
};

/// Provider capabilities the use cases depend on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession>;

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<StripeCheckoutSession>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription>;

    async fn modify_subscription(
        &self,
        subscription_id: &str,
        modification: SubscriptionModification,
    ) -> Result<StripeSubscription>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<()>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession> {
        StripeClient::create_checkout_session(self, &request).await
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<StripeCheckoutSession> {
        StripeClient::retrieve_checkout_session(self, session_id).await
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        StripeClient::retrieve_subscription(self, subscription_id).await
    }

    async fn modify_subscription(
        &self,
        subscription_id: &str,
        modification: SubscriptionModification,
    ) -> Result<StripeSubscription> {
        StripeClient::modify_subscription(self, subscription_id, &modification).await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        StripeClient::cancel_subscription(self, subscription_id).await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<()> {
        StripeClient::verify_webhook_signature(self, payload, signature)
    }
}
