use crate::domain::gateway::AccountCapabilities;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A shop's destination account at the payment gateway.
///
/// One per shop; the flags only change in response to an account sync.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ConnectedAccount {
    pub shop_id: Uuid,
    /// Identifier assigned by the gateway.
    pub account_id: String,
    pub onboarding_completed: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectedAccount {
    pub fn new(shop_id: Uuid, account_id: String, now: DateTime<Utc>) -> Self {
        Self {
            shop_id,
            account_id,
            onboarding_completed: false,
            charges_enabled: false,
            payouts_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether checkouts may route funds to this account.
    pub fn can_receive_payments(&self) -> bool {
        self.charges_enabled && self.onboarding_completed
    }

    /// Copies the gateway's flags; returns whether anything changed.
    pub fn apply_capabilities(&mut self, caps: &AccountCapabilities, now: DateTime<Utc>) -> bool {
        let changed = self.charges_enabled != caps.charges_enabled
            || self.payouts_enabled != caps.payouts_enabled
            || self.onboarding_completed != caps.details_submitted;
        self.charges_enabled = caps.charges_enabled;
        self.payouts_enabled = caps.payouts_enabled;
        self.onboarding_completed = caps.details_submitted;
        if changed {
            self.updated_at = now;
        }
        changed
    }
}

/// Read model served to shops checking their onboarding progress.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AccountStatusView {
    pub shop_id: Uuid,
    pub account_id: String,
    pub onboarding_completed: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub can_receive_payments: bool,
}

impl From<&ConnectedAccount> for AccountStatusView {
    fn from(account: &ConnectedAccount) -> Self {
        Self {
            shop_id: account.shop_id,
            account_id: account.account_id.clone(),
            onboarding_completed: account.onboarding_completed,
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            can_receive_payments: account.can_receive_payments(),
        }
    }
}
