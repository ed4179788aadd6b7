use super::bounded;
use crate::config::GatewaySettings;
use crate::domain::connected_account::{AccountStatusView, ConnectedAccount};
use crate::domain::money::Currency;
use crate::domain::ports::{ClockRef, ConnectedAccountStoreRef, PaymentGatewayRef};
use crate::error::{PaymentError, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Informational answer to the gateway's onboarding redirects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectNotice {
    pub status: &'static str,
    pub message: &'static str,
}

/// Onboarding lifecycle of the shops' destination accounts.
pub struct ConnectedAccountManager {
    store: ConnectedAccountStoreRef,
    gateway: PaymentGatewayRef,
    clock: ClockRef,
    country: String,
    default_currency: Currency,
    gateway_timeout: Duration,
}

impl ConnectedAccountManager {
    pub fn new(
        store: ConnectedAccountStoreRef,
        gateway: PaymentGatewayRef,
        clock: ClockRef,
        settings: &GatewaySettings,
    ) -> Result<Self> {
        Ok(Self {
            store,
            gateway,
            clock,
            country: settings.account_country.clone(),
            default_currency: Currency::new(&settings.account_default_currency)?,
            gateway_timeout: settings.timeout(),
        })
    }

    /// Returns the shop's account, provisioning one at the gateway on first call.
    ///
    /// Nothing is persisted unless the gateway call succeeded.
    #[tracing::instrument(skip(self))]
    pub async fn create_account(&self, shop_id: Uuid) -> Result<ConnectedAccount> {
        if let Some(existing) = self.store.get_by_shop(shop_id).await? {
            return Ok(existing);
        }

        let provisioned = bounded(
            self.gateway_timeout,
            self.gateway
                .create_connected_account(&self.country, &self.default_currency),
        )
        .await?;

        let account = ConnectedAccount::new(shop_id, provisioned.id, self.clock.now());
        match self.store.insert(account.clone()).await {
            Ok(()) => {
                info!(%shop_id, account_id = %account.account_id, "connected account created");
                Ok(account)
            }
            Err(PaymentError::Conflict(_)) => {
                // A concurrent call for the same shop won the insert.
                let winner = self.store.get_by_shop(shop_id).await?.ok_or_else(|| {
                    PaymentError::Storage(format!("account for shop {shop_id} vanished"))
                })?;
                warn!(
                    %shop_id,
                    orphan_account_id = %account.account_id,
                    account_id = %winner.account_id,
                    "concurrent account creation, gateway account left unused"
                );
                Ok(winner)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_onboarding_link(
        &self,
        account_id: &str,
        return_url: &str,
        refresh_url: &str,
    ) -> Result<String> {
        let url = bounded(
            self.gateway_timeout,
            self.gateway
                .create_onboarding_link(account_id, return_url, refresh_url),
        )
        .await?;
        Ok(url)
    }

    pub async fn create_onboarding_link_for_shop(
        &self,
        shop_id: Uuid,
        return_url: &str,
        refresh_url: &str,
    ) -> Result<String> {
        let account = self.require_shop(shop_id).await?;
        self.create_onboarding_link(&account.account_id, return_url, refresh_url)
            .await
    }

    /// Copies the gateway's capability flags onto the local record.
    #[tracing::instrument(skip(self))]
    pub async fn sync_account_status(&self, account_id: &str) -> Result<ConnectedAccount> {
        let mut account = self
            .store
            .get_by_account_id(account_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("connected account {account_id}")))?;

        let capabilities = bounded(
            self.gateway_timeout,
            self.gateway.retrieve_account(account_id),
        )
        .await?;

        if account.apply_capabilities(&capabilities, self.clock.now()) {
            self.store.save(account.clone()).await?;
            info!(
                account_id,
                charges_enabled = account.charges_enabled,
                payouts_enabled = account.payouts_enabled,
                onboarding_completed = account.onboarding_completed,
                "connected account synced"
            );
        }
        Ok(account)
    }

    /// Local read only; the gateway is never consulted here.
    pub async fn can_receive_payments(&self, shop_id: Uuid) -> Result<bool> {
        Ok(self.payable_account(shop_id).await?.is_some())
    }

    /// The shop's account if it can currently receive routed funds.
    pub async fn payable_account(&self, shop_id: Uuid) -> Result<Option<ConnectedAccount>> {
        Ok(self
            .store
            .get_by_shop(shop_id)
            .await?
            .filter(ConnectedAccount::can_receive_payments))
    }

    pub async fn account_status(&self, shop_id: Uuid) -> Result<AccountStatusView> {
        let account = self.require_shop(shop_id).await?;
        Ok(AccountStatusView::from(&account))
    }

    /// The account's flags only change through `account.updated`, not through this redirect.
    pub fn handle_return(&self, account_id: Option<&str>) -> RedirectNotice {
        info!(account_id = account_id.unwrap_or("-"), "onboarding return");
        RedirectNotice {
            status: "success",
            message: "Onboarding completed",
        }
    }

    pub fn handle_reauth(&self, account_id: Option<&str>) -> RedirectNotice {
        info!(account_id = account_id.unwrap_or("-"), "onboarding link expired");
        RedirectNotice {
            status: "reauth",
            message: "Please restart onboarding",
        }
    }

    async fn require_shop(&self, shop_id: Uuid) -> Result<ConnectedAccount> {
        self.store
            .get_by_shop(shop_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("connected account for shop {shop_id}")))
    }
}
