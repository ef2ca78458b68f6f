pub mod billing_errors;
pub mod billing_intents;
pub mod entitlements;
pub mod enums;
pub mod plans;
