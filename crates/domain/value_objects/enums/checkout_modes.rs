use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Checkout session modes this service opens and understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Subscription,
    Setup,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Subscription => "subscription",
            CheckoutMode::Setup => "setup",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "subscription" => Some(CheckoutMode::Subscription),
            "setup" => Some(CheckoutMode::Setup),
            _ => None,
        }
    }
}

impl Display for CheckoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
