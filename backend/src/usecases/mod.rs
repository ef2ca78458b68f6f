pub mod billing_webhooks;
pub mod entitlements;
pub mod stripe_gateway;
pub mod subscriptions;
