pub mod billing;
pub mod credits;
pub mod webhooks;
