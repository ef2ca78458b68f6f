pub mod event_normalizer;
pub mod stripe_client;
