use super::bounded;
use super::accounts::ConnectedAccountManager;
use super::payments::PaymentStateMachine;
use crate::config::{CatalogSettings, GatewaySettings, PlatformSettings};
use crate::domain::gateway::{CheckoutRequest, CheckoutSession, SettlementRouting};
use crate::domain::money::{Amount, Currency};
use crate::domain::payment::{NewPayment, Payment};
use crate::domain::ports::{CatalogClientRef, PaymentGatewayRef};
use crate::error::{GatewayError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A buyer's request to pay a shop, as received from the outside.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutCommand {
    pub buyer_id: Uuid,
    pub shop_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    /// Minor units of `currency`.
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutOutcome {
    pub payment_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
    pub routing: SettlementRouting,
}

/// Creates the local payment and its hosted checkout session.
///
/// Funds go to the shop's connected account with the platform fee withheld when
/// the account can receive payments. If that attempt is refused the session is
/// retried once against the platform account.
pub struct CheckoutOrchestrator {
    payments: Arc<PaymentStateMachine>,
    accounts: Arc<ConnectedAccountManager>,
    gateway: PaymentGatewayRef,
    catalog: CatalogClientRef,
    fee_percent: Decimal,
    public_base_url: String,
    supported_currencies: Vec<String>,
    gateway_timeout: Duration,
    catalog_timeout: Duration,
}

impl CheckoutOrchestrator {
    pub fn new(
        payments: Arc<PaymentStateMachine>,
        accounts: Arc<ConnectedAccountManager>,
        gateway: PaymentGatewayRef,
        catalog: CatalogClientRef,
        platform: &PlatformSettings,
        gateway_settings: &GatewaySettings,
        catalog_settings: &CatalogSettings,
    ) -> Self {
        Self {
            payments,
            accounts,
            gateway,
            catalog,
            fee_percent: platform.fee_percent,
            public_base_url: platform.public_base_url.trim_end_matches('/').to_string(),
            supported_currencies: platform.supported_currencies.clone(),
            gateway_timeout: gateway_settings.timeout(),
            catalog_timeout: catalog_settings.timeout(),
        }
    }

    #[tracing::instrument(skip(self, command), fields(shop_id = %command.shop_id, amount = %command.amount))]
    pub async fn create_checkout(&self, command: CheckoutCommand) -> Result<CheckoutOutcome> {
        let amount = Amount::new(command.amount)?;
        let currency = Currency::supported(&command.currency, &self.supported_currencies)?;

        let payment = self
            .payments
            .create(NewPayment {
                buyer_id: command.buyer_id,
                shop_id: command.shop_id,
                appointment_id: command.appointment_id,
                service_id: command.service_id,
                amount,
                currency,
                commission_rate: self.fee_percent,
            })
            .await?;

        let line_item_name = self
            .line_item_name(command.shop_id, command.service_id)
            .await;

        let (session, routing) = match self.open_session(&payment, line_item_name).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "checkout session could not be created, payment left pending");
                return Err(e.into());
            }
        };

        self.payments
            .attach_checkout(payment.id, &session, &routing)
            .await?;
        info!(
            payment_id = %payment.id,
            session_id = %session.id,
            destination = routing.is_destination(),
            "checkout session created"
        );

        Ok(CheckoutOutcome {
            payment_id: payment.id,
            session_id: session.id,
            checkout_url: session.url,
            routing,
        })
    }

    async fn open_session(
        &self,
        payment: &Payment,
        line_item_name: String,
    ) -> std::result::Result<(CheckoutSession, SettlementRouting), GatewayError> {
        let mut request = CheckoutRequest {
            payment_id: payment.id,
            line_item_name,
            amount: payment.amount,
            currency: payment.currency.clone(),
            success_url: format!(
                "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.public_base_url
            ),
            cancel_url: format!("{}/payment/cancel", self.public_base_url),
            routing: SettlementRouting::Platform,
        };

        let destination = match self.accounts.payable_account(payment.shop_id).await {
            Ok(account) => account,
            Err(e) => {
                warn!(shop_id = %payment.shop_id, error = %e, "connected account lookup failed, using platform account");
                None
            }
        };

        if let Some(account) = destination {
            request.routing = SettlementRouting::Destination {
                account_id: account.account_id.clone(),
                application_fee: payment.commission_amount,
            };
            match self.create_session(&request).await {
                Ok(session) => return Ok((session, request.routing)),
                Err(e) => {
                    warn!(
                        shop_id = %payment.shop_id,
                        account_id = %account.account_id,
                        error = %e,
                        "destination checkout refused, falling back to platform account"
                    );
                    request.routing = SettlementRouting::Platform;
                }
            }
        } else {
            info!(shop_id = %payment.shop_id, "shop cannot receive payments, using platform account");
        }

        let session = self.create_session(&request).await?;
        Ok((session, SettlementRouting::Platform))
    }

    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> std::result::Result<CheckoutSession, GatewayError> {
        bounded(
            self.gateway_timeout,
            self.gateway.create_checkout_session(request),
        )
        .await
    }

    /// Service name and description when the catalog knows the service, else a generic label.
    async fn line_item_name(&self, shop_id: Uuid, service_id: Option<Uuid>) -> String {
        let shop = shop_id.simple().to_string();
        let generic = format!("Shop payment - {}", &shop[..8]);
        let Some(service_id) = service_id else {
            return generic;
        };

        match bounded(self.catalog_timeout, self.catalog.service_details(service_id)).await {
            Ok(Some(details)) => match details.description.as_deref() {
                Some(description) if !description.is_empty() => {
                    format!("Service: {} - {}", details.name, description)
                }
                _ => format!("Service: {}", details.name),
            },
            Ok(None) => generic,
            Err(e) => {
                warn!(%service_id, error = %e, "service lookup failed, using generic description");
                generic
            }
        }
    }
}
