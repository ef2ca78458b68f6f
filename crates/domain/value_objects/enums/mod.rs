pub mod checkout_modes;
pub mod plan_types;
pub mod subscription_statuses;
