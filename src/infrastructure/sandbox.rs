//! In-process gateway double with the provider's observable behavior: account
//! provisioning, destination checks on checkout and idempotent refunds.

use crate::domain::gateway::{
    AccountCapabilities, CheckoutRequest, CheckoutSession, ProvisionedAccount, RefundReceipt,
    RefundRequest, SettlementRouting,
};
use crate::domain::money::{Currency, Money};
use crate::domain::ports::{GatewayResult, PaymentGateway};
use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct SandboxState {
    sequence: u64,
    accounts: HashMap<String, AccountCapabilities>,
    checkouts: Vec<CheckoutRequest>,
    /// Charged amount per payment intent.
    charges: HashMap<String, Money>,
    refunded: HashMap<String, Money>,
    refunds: Vec<RefundRequest>,
    receipts: HashMap<String, RefundReceipt>,
}

impl SandboxState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}_sandbox_{:06}", self.sequence)
    }
}

fn rejected(code: &str, message: impl Into<String>) -> GatewayError {
    GatewayError::Rejected {
        code: code.to_string(),
        message: message.into(),
    }
}

#[derive(Default, Clone)]
pub struct SandboxGateway {
    state: Arc<RwLock<SandboxState>>,
    reject_destination: Arc<AtomicBool>,
    reject_checkouts: Arc<AtomicBool>,
    reject_refunds: Arc<AtomicBool>,
    lose_refund_responses: Arc<AtomicBool>,
    fail_account_calls: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses destination-routed checkouts, as for a restricted connected account.
    pub fn reject_destination_checkouts(&self, reject: bool) {
        self.reject_destination.store(reject, Ordering::SeqCst);
    }

    pub fn reject_all_checkouts(&self, reject: bool) {
        self.reject_checkouts.store(reject, Ordering::SeqCst);
    }

    pub fn reject_refunds(&self, reject: bool) {
        self.reject_refunds.store(reject, Ordering::SeqCst);
    }

    /// Processes refunds but answers with a transport error, as when the response is lost.
    pub fn lose_refund_responses(&self, lose: bool) {
        self.lose_refund_responses.store(lose, Ordering::SeqCst);
    }

    /// Makes account provisioning and retrieval fail with a transport error.
    pub fn fail_account_calls(&self, fail: bool) {
        self.fail_account_calls.store(fail, Ordering::SeqCst);
    }

    /// Delays every call, for exercising timeouts.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Registers an account the platform did not provision through this gateway.
    pub async fn register_account(&self, account_id: &str, capabilities: AccountCapabilities) {
        self.state
            .write()
            .await
            .accounts
            .insert(account_id.to_string(), capabilities);
    }

    pub async fn set_capabilities(&self, account_id: &str, capabilities: AccountCapabilities) {
        self.register_account(account_id, capabilities).await;
    }

    pub async fn checkout_requests(&self) -> Vec<CheckoutRequest> {
        self.state.read().await.checkouts.clone()
    }

    pub async fn refund_requests(&self) -> Vec<RefundRequest> {
        self.state.read().await.refunds.clone()
    }

    pub async fn refunded(&self, payment_intent_id: &str) -> Money {
        self.state
            .read()
            .await
            .refunded
            .get(payment_intent_id)
            .copied()
            .unwrap_or(Money::ZERO)
    }

    /// Number of connected accounts provisioned through this gateway.
    pub async fn accounts_provisioned(&self) -> usize {
        self.state
            .read()
            .await
            .accounts
            .keys()
            .filter(|id| id.starts_with("acct_sandbox_"))
            .count()
    }

    fn check_account_calls(&self) -> GatewayResult<()> {
        if self.fail_account_calls.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport(
                "sandbox accounts unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let millis = self.latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_connected_account(
        &self,
        _country: &str,
        _default_currency: &Currency,
    ) -> GatewayResult<ProvisionedAccount> {
        self.simulate_latency().await;
        self.check_account_calls()?;
        let mut state = self.state.write().await;
        let id = state.next_id("acct");
        state
            .accounts
            .insert(id.clone(), AccountCapabilities::default());
        Ok(ProvisionedAccount { id })
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        _return_url: &str,
        _refresh_url: &str,
    ) -> GatewayResult<String> {
        self.simulate_latency().await;
        let state = self.state.read().await;
        match state.accounts.get(account_id) {
            None => Err(rejected(
                "resource_missing",
                format!("No such account: '{account_id}'"),
            )),
            Some(caps) if caps.details_submitted && caps.charges_enabled => Err(rejected(
                "account_onboarded",
                "account has already completed onboarding",
            )),
            Some(_) => Ok(format!("https://connect.sandbox.local/setup/e/{account_id}")),
        }
    }

    async fn retrieve_account(&self, account_id: &str) -> GatewayResult<AccountCapabilities> {
        self.simulate_latency().await;
        self.check_account_calls()?;
        self.state
            .read()
            .await
            .accounts
            .get(account_id)
            .copied()
            .ok_or_else(|| {
                rejected(
                    "resource_missing",
                    format!("No such account: '{account_id}'"),
                )
            })
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSession> {
        self.simulate_latency().await;
        if self.reject_checkouts.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("sandbox unavailable".to_string()));
        }
        let mut state = self.state.write().await;
        if let SettlementRouting::Destination { account_id, .. } = &request.routing {
            if self.reject_destination.load(Ordering::SeqCst) {
                return Err(rejected(
                    "account_invalid",
                    "connected account cannot accept direct charges",
                ));
            }
            let chargeable = state
                .accounts
                .get(account_id)
                .is_some_and(|caps| caps.charges_enabled);
            if !chargeable {
                return Err(rejected(
                    "account_invalid",
                    format!("account {account_id} cannot accept charges"),
                ));
            }
        }

        let session_id = state.next_id("cs");
        let payment_intent_id = state.next_id("pi");
        state
            .charges
            .insert(payment_intent_id.clone(), request.amount);
        state.checkouts.push(request.clone());
        Ok(CheckoutSession {
            url: format!("https://checkout.sandbox.local/c/pay/{session_id}"),
            id: session_id,
            payment_intent_id: Some(payment_intent_id),
        })
    }

    async fn create_refund(&self, request: &RefundRequest) -> GatewayResult<RefundReceipt> {
        self.simulate_latency().await;
        if self.reject_refunds.load(Ordering::SeqCst) {
            return Err(rejected("refund_failed", "sandbox refused the refund"));
        }
        let mut state = self.state.write().await;
        if let Some(receipt) = state.receipts.get(&request.idempotency_key) {
            return Ok(receipt.clone());
        }

        let already = state
            .refunded
            .get(&request.payment_intent_id)
            .copied()
            .unwrap_or(Money::ZERO);
        // Intents created by another process are unknown here and are not capped.
        if let Some(charged) = state.charges.get(&request.payment_intent_id)
            && already + request.amount > *charged
        {
            return Err(rejected(
                "charge_already_refunded",
                "refund exceeds the charged amount",
            ));
        }

        let receipt = RefundReceipt {
            id: state.next_id("re"),
            amount: request.amount,
        };
        state
            .refunded
            .insert(request.payment_intent_id.clone(), already + request.amount);
        state.refunds.push(request.clone());
        state
            .receipts
            .insert(request.idempotency_key.clone(), receipt.clone());
        if self.lose_refund_responses.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport(
                "connection reset after refund was accepted".to_string(),
            ));
        }
        Ok(receipt)
    }
}
