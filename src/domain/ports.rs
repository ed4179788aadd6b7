use super::connected_account::ConnectedAccount;
use super::gateway::{
    AccountCapabilities, CheckoutRequest, CheckoutSession, ProvisionedAccount, RefundReceipt,
    RefundRequest,
};
use super::ledger::{ClaimOutcome, ProcessedEventRecord};
use super::money::Currency;
use super::payment::Payment;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a new payment. Fails with `Conflict` if its id or a correlation id is taken.
    async fn insert(&self, payment: Payment) -> Result<()>;
    /// Compare-and-swap write: succeeds only if the stored version still equals
    /// `payment.version`, and returns the record with its version bumped.
    async fn update(&self, payment: Payment) -> Result<Payment>;
    async fn get(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_checkout_session(&self, session_id: &str) -> Result<Option<Payment>>;
    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>>;
    async fn find_by_appointment(&self, appointment_id: Uuid) -> Result<Option<Payment>>;
    async fn get_all(&self) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait ConnectedAccountStore: Send + Sync {
    /// Fails with `Conflict` when the shop or the gateway account id already has a record.
    async fn insert(&self, account: ConnectedAccount) -> Result<()>;
    async fn save(&self, account: ConnectedAccount) -> Result<()>;
    async fn get_by_shop(&self, shop_id: Uuid) -> Result<Option<ConnectedAccount>>;
    async fn get_by_account_id(&self, account_id: &str) -> Result<Option<ConnectedAccount>>;
}

#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Atomically claims `event_id`; at most one concurrent caller gets `Claimed`.
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome>;
    async fn complete(&self, event_id: &str, now: DateTime<Utc>) -> Result<()>;
    /// Drops an in-progress claim so a redelivery can process the event again.
    async fn release(&self, event_id: &str) -> Result<()>;
    async fn get(&self, event_id: &str) -> Result<Option<ProcessedEventRecord>>;
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_connected_account(
        &self,
        country: &str,
        default_currency: &Currency,
    ) -> GatewayResult<ProvisionedAccount>;
    async fn create_onboarding_link(
        &self,
        account_id: &str,
        return_url: &str,
        refresh_url: &str,
    ) -> GatewayResult<String>;
    async fn retrieve_account(&self, account_id: &str) -> GatewayResult<AccountCapabilities>;
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSession>;
    async fn create_refund(&self, request: &RefundRequest) -> GatewayResult<RefundReceipt>;
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;
}

/// Service metadata owned by the sibling shop service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDetails {
    pub name: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn service_details(&self, service_id: Uuid) -> Result<Option<ServiceDetails>>;
    async fn mark_appointment_paid(&self, appointment_id: Uuid) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type ConnectedAccountStoreRef = Arc<dyn ConnectedAccountStore>;
pub type ProcessedEventStoreRef = Arc<dyn ProcessedEventStore>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type EventBusRef = Arc<dyn EventBus>;
pub type CatalogClientRef = Arc<dyn CatalogClient>;
pub type ClockRef = Arc<dyn Clock>;
