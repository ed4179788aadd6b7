use crate::config::GatewaySettings;
use crate::domain::gateway::{
    AccountCapabilities, CheckoutRequest, CheckoutSession, ProvisionedAccount, RefundReceipt,
    RefundRequest, SettlementRouting,
};
use crate::domain::money::{Currency, Money};
use crate::domain::ports::{GatewayResult, PaymentGateway};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const STRIPE_ACCOUNT_HEADER: &str = "Stripe-Account";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

type Form = Vec<(&'static str, String)>;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Deserialize)]
struct AccountLinkObject {
    url: String,
}

#[derive(Deserialize)]
struct SessionObject {
    id: String,
    url: Option<String>,
    payment_intent: Option<String>,
}

#[derive(Deserialize)]
struct RefundObject {
    id: String,
    amount: u64,
}

/// Gateway adapter speaking the provider's form-encoded REST API.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    http_client: Client,
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
}

impl StripeGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout: settings.timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn post(&self, path: &str, form: &Form) -> RequestBuilder {
        self.http_client
            .post(self.url(path))
            .bearer_auth(self.api_key.expose_secret())
            .form(form)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<T> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| GatewayError::Protocol(format!("undecodable response: {e}")));
        }
        match serde_json::from_slice::<ErrorEnvelope>(&body) {
            Ok(envelope) if status.is_client_error() => Err(GatewayError::Rejected {
                code: envelope
                    .error
                    .code
                    .or(envelope.error.kind)
                    .unwrap_or_else(|| status.as_str().to_string()),
                message: envelope.error.message.unwrap_or_default(),
            }),
            _ => Err(GatewayError::Transport(format!(
                "gateway answered {status}"
            ))),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

fn minor_units(amount: Money) -> GatewayResult<String> {
    amount
        .to_minor_units()
        .map(|units| units.to_string())
        .map_err(|e| GatewayError::Protocol(e.to_string()))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_connected_account(
        &self,
        country: &str,
        default_currency: &Currency,
    ) -> GatewayResult<ProvisionedAccount> {
        let form: Form = vec![
            ("type", "express".to_string()),
            ("country", country.to_string()),
            ("default_currency", default_currency.to_string()),
            ("capabilities[card_payments][requested]", "true".to_string()),
            ("capabilities[transfers][requested]", "true".to_string()),
        ];
        let account: IdObject = self.send(self.post("accounts", &form)).await?;
        Ok(ProvisionedAccount { id: account.id })
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        return_url: &str,
        refresh_url: &str,
    ) -> GatewayResult<String> {
        let form: Form = vec![
            ("account", account_id.to_string()),
            ("refresh_url", refresh_url.to_string()),
            ("return_url", return_url.to_string()),
            ("type", "account_onboarding".to_string()),
        ];
        let link: AccountLinkObject = self.send(self.post("account_links", &form)).await?;
        Ok(link.url)
    }

    async fn retrieve_account(&self, account_id: &str) -> GatewayResult<AccountCapabilities> {
        let request = self
            .http_client
            .get(self.url(&format!("accounts/{account_id}")))
            .bearer_auth(self.api_key.expose_secret());
        self.send(request).await
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSession> {
        let mut form: Form = vec![
            ("mode", "payment".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", request.payment_id.to_string()),
            ("metadata[payment_id]", request.payment_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.currency.to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                minor_units(request.amount)?,
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.line_item_name.clone(),
            ),
        ];

        let builder = match &request.routing {
            SettlementRouting::Destination {
                account_id,
                application_fee,
            } => {
                form.push((
                    "payment_intent_data[application_fee_amount]",
                    minor_units(*application_fee)?,
                ));
                self.post("checkout/sessions", &form)
                    .header(STRIPE_ACCOUNT_HEADER, account_id.as_str())
                    .header(
                        IDEMPOTENCY_HEADER,
                        format!("checkout-{}-destination", request.payment_id),
                    )
            }
            SettlementRouting::Platform => self.post("checkout/sessions", &form).header(
                IDEMPOTENCY_HEADER,
                format!("checkout-{}-platform", request.payment_id),
            ),
        };

        let session: SessionObject = self.send(builder).await?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::Protocol("checkout session has no url".to_string()))?;
        Ok(CheckoutSession {
            id: session.id,
            payment_intent_id: session.payment_intent,
            url,
        })
    }

    async fn create_refund(&self, request: &RefundRequest) -> GatewayResult<RefundReceipt> {
        let form: Form = vec![
            ("payment_intent", request.payment_intent_id.clone()),
            ("amount", minor_units(request.amount)?),
        ];
        let mut builder = self
            .post("refunds", &form)
            .header(IDEMPOTENCY_HEADER, request.idempotency_key.as_str());
        if let Some(account_id) = &request.connected_account_id {
            builder = builder.header(STRIPE_ACCOUNT_HEADER, account_id.as_str());
        }
        let refund: RefundObject = self.send(builder).await?;
        Ok(RefundReceipt {
            id: refund.id,
            amount: Money::from_minor(refund.amount),
        })
    }
}
