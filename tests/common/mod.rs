#![allow(dead_code)]

use chrono::Utc;
use marketpay::application::accounts::ConnectedAccountManager;
use marketpay::application::checkout::{CheckoutCommand, CheckoutOrchestrator};
use marketpay::application::payments::PaymentStateMachine;
use marketpay::application::publisher::IntegrationEventPublisher;
use marketpay::application::webhook::{WebhookEventProcessor, WebhookOutcome};
use marketpay::config::Settings;
use marketpay::domain::gateway::AccountCapabilities;
use marketpay::domain::integration::IntegrationEvent;
use marketpay::domain::ports::Clock;
use marketpay::domain::signature::SignatureVerifier;
use marketpay::error::Result;
use marketpay::infrastructure::clock::ManualClock;
use marketpay::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryConnectedAccountStore, InMemoryEventBus, InMemoryPaymentStore,
    InMemoryProcessedEventStore,
};
use marketpay::infrastructure::sandbox::SandboxGateway;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.webhook.secret = SecretString::from(WEBHOOK_SECRET.to_string());
    settings.gateway.timeout_ms = 200;
    settings.catalog.timeout_ms = 200;
    settings.platform.public_base_url = "https://shop.example".to_string();
    settings
}

/// Every service wired to in-memory adapters, the sandbox gateway and a manual clock.
pub struct Harness {
    pub settings: Settings,
    pub clock: ManualClock,
    pub gateway: SandboxGateway,
    pub bus: InMemoryEventBus,
    pub catalog: InMemoryCatalog,
    pub payment_store: InMemoryPaymentStore,
    pub account_store: InMemoryConnectedAccountStore,
    pub ledger: InMemoryProcessedEventStore,
    pub payments: Arc<PaymentStateMachine>,
    pub accounts: Arc<ConnectedAccountManager>,
    pub checkout: CheckoutOrchestrator,
    pub webhooks: WebhookEventProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let clock = ManualClock::new(Utc::now());
        let gateway = SandboxGateway::new();
        let bus = InMemoryEventBus::new();
        let catalog = InMemoryCatalog::new();
        let payment_store = InMemoryPaymentStore::new();
        let account_store = InMemoryConnectedAccountStore::new();
        let ledger = InMemoryProcessedEventStore::new();

        let payments = Arc::new(PaymentStateMachine::new(
            Arc::new(payment_store.clone()),
            Arc::new(gateway.clone()),
            Arc::new(clock.clone()),
            settings.platform.refund_window(),
            settings.gateway.timeout(),
        ));
        let accounts = Arc::new(
            ConnectedAccountManager::new(
                Arc::new(account_store.clone()),
                Arc::new(gateway.clone()),
                Arc::new(clock.clone()),
                &settings.gateway,
            )
            .unwrap(),
        );
        let publisher = Arc::new(IntegrationEventPublisher::new(
            Arc::new(bus.clone()),
            Arc::new(clock.clone()),
            settings.bus.clone(),
        ));
        let checkout = CheckoutOrchestrator::new(
            payments.clone(),
            accounts.clone(),
            Arc::new(gateway.clone()),
            Arc::new(catalog.clone()),
            &settings.platform,
            &settings.gateway,
            &settings.catalog,
        );
        let webhooks = WebhookEventProcessor::new(
            payments.clone(),
            accounts.clone(),
            publisher,
            Arc::new(ledger.clone()),
            Arc::new(catalog.clone()),
            Arc::new(clock.clone()),
            &settings,
        );

        Self {
            settings,
            clock,
            gateway,
            bus,
            catalog,
            payment_store,
            account_store,
            ledger,
            payments,
            accounts,
            checkout,
            webhooks,
        }
    }

    /// Creates a connected account for a new shop and syncs it as fully onboarded.
    pub async fn onboarded_shop(&self) -> (Uuid, String) {
        let shop_id = Uuid::new_v4();
        let account = self.accounts.create_account(shop_id).await.unwrap();
        self.gateway
            .set_capabilities(
                &account.account_id,
                AccountCapabilities {
                    charges_enabled: true,
                    payouts_enabled: true,
                    details_submitted: true,
                },
            )
            .await;
        self.accounts
            .sync_account_status(&account.account_id)
            .await
            .unwrap();
        (shop_id, account.account_id)
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        SignatureVerifier::new(
            SecretString::from(WEBHOOK_SECRET.to_string()),
            self.settings.webhook.tolerance(),
        )
        .sign(payload, self.clock.now())
        .unwrap()
    }

    /// Signs and delivers `event` to the webhook processor.
    pub async fn deliver(&self, event: &Value) -> Result<WebhookOutcome> {
        let payload = serde_json::to_vec(event).unwrap();
        let signature = self.sign(&payload);
        self.webhooks.handle(&payload, &signature).await
    }

    pub async fn published(&self) -> Vec<(String, IntegrationEvent)> {
        self.bus
            .messages()
            .await
            .into_iter()
            .map(|m| (m.routing_key, serde_json::from_slice(&m.payload).unwrap()))
            .collect()
    }
}

pub fn checkout_command(shop_id: Uuid, amount: u64) -> CheckoutCommand {
    CheckoutCommand {
        buyer_id: Uuid::new_v4(),
        shop_id,
        appointment_id: None,
        service_id: None,
        amount: rust_decimal::Decimal::from(amount),
        currency: "eur".to_string(),
    }
}

pub fn session_completed(event_id: &str, session_id: &str) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": { "id": session_id, "object": "checkout.session" } }
    })
}

pub fn session_expired(event_id: &str, session_id: &str) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.expired",
        "data": { "object": { "id": session_id, "object": "checkout.session" } }
    })
}

pub fn charge_refunded(event_id: &str, payment_intent_id: &str, amount_refunded: u64) -> Value {
    json!({
        "id": event_id,
        "type": "charge.refunded",
        "data": { "object": {
            "id": "ch_test",
            "object": "charge",
            "payment_intent": payment_intent_id,
            "amount_refunded": amount_refunded
        } }
    })
}

pub fn account_updated(event_id: &str, account_id: &str) -> Value {
    json!({
        "id": event_id,
        "type": "account.updated",
        "data": { "object": { "id": account_id, "object": "account" } }
    })
}
