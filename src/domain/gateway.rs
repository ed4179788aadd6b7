//! Request and response shapes exchanged with the external payment gateway.

use crate::domain::money::{Currency, Money};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the funds of a checkout settle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettlementRouting {
    /// Funds stay on the platform account, no fee split.
    Platform,
    /// Funds are charged on the shop's connected account, the platform withholding `application_fee`.
    Destination {
        account_id: String,
        application_fee: Money,
    },
}

impl SettlementRouting {
    pub fn is_destination(&self) -> bool {
        matches!(self, SettlementRouting::Destination { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub payment_id: Uuid,
    pub line_item_name: String,
    pub amount: Money,
    pub currency: Currency,
    pub success_url: String,
    pub cancel_url: String,
    pub routing: SettlementRouting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub payment_intent_id: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub payment_intent_id: String,
    pub amount: Money,
    /// Connected account that owns the charge, for destination-routed payments.
    pub connected_account_id: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedAccount {
    pub id: String,
}

/// Capability flags of a connected account as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountCapabilities {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}
