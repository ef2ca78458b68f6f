pub mod entitlements;
pub mod invoices;
pub mod plans;
