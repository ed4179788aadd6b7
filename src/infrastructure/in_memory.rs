use crate::domain::connected_account::ConnectedAccount;
use crate::domain::ledger::{ClaimOutcome, LedgerState, ProcessedEventRecord};
use crate::domain::payment::Payment;
use crate::domain::ports::{
    CatalogClient, ConnectedAccountStore, EventBus, PaymentStore, ProcessedEventStore,
    ServiceDetails,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory payment store.
///
/// The write lock is held across the version check and the write, which makes
/// `update` a true compare-and-swap.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether another payment already holds the candidate's checkout session or payment intent.
fn correlation_taken(payments: &HashMap<Uuid, Payment>, candidate: &Payment) -> bool {
    let same = |theirs: Option<&str>, ours: Option<&str>| ours.is_some() && theirs == ours;
    payments.values().any(|p| {
        p.id != candidate.id
            && (same(
                p.checkout_session_id.as_deref(),
                candidate.checkout_session_id.as_deref(),
            ) || same(
                p.payment_intent_id.as_deref(),
                candidate.payment_intent_id.as_deref(),
            ))
    })
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(PaymentError::Conflict(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        if correlation_taken(&payments, &payment) {
            return Err(PaymentError::Conflict(
                "correlation id already linked to another payment".to_string(),
            ));
        }
        payments.insert(payment.id, payment);
        Ok(())
    }

    async fn update(&self, mut payment: Payment) -> Result<Payment> {
        let mut payments = self.payments.write().await;
        let current = payments
            .get(&payment.id)
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.id)))?;
        if current.version != payment.version {
            return Err(PaymentError::Conflict(format!(
                "payment {} is at version {}, write was based on {}",
                payment.id, current.version, payment.version
            )));
        }
        if correlation_taken(&payments, &payment) {
            return Err(PaymentError::Conflict(
                "correlation id already linked to another payment".to_string(),
            ));
        }
        payment.version += 1;
        payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(&id).cloned())
    }

    async fn find_by_checkout_session(&self, session_id: &str) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| p.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| p.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn find_by_appointment(&self, appointment_id: Uuid) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| p.appointment_id == Some(appointment_id))
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut all: Vec<Payment> = payments.values().cloned().collect();
        all.sort_by_key(|p| (p.created_at, p.id));
        Ok(all)
    }
}

/// Connected accounts keyed by shop.
#[derive(Default, Clone)]
pub struct InMemoryConnectedAccountStore {
    accounts: Arc<RwLock<HashMap<Uuid, ConnectedAccount>>>,
}

impl InMemoryConnectedAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectedAccountStore for InMemoryConnectedAccountStore {
    async fn insert(&self, account: ConnectedAccount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.shop_id)
            || accounts.values().any(|a| a.account_id == account.account_id)
        {
            return Err(PaymentError::Conflict(format!(
                "connected account for shop {} already exists",
                account.shop_id
            )));
        }
        accounts.insert(account.shop_id, account);
        Ok(())
    }

    async fn save(&self, account: ConnectedAccount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.shop_id, account);
        Ok(())
    }

    async fn get_by_shop(&self, shop_id: Uuid) -> Result<Option<ConnectedAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&shop_id).cloned())
    }

    async fn get_by_account_id(&self, account_id: &str) -> Result<Option<ConnectedAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.account_id == account_id)
            .cloned())
    }
}

/// Webhook dedup ledger.
#[derive(Default, Clone)]
pub struct InMemoryProcessedEventStore {
    events: Arc<RwLock<HashMap<String, ProcessedEventRecord>>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome> {
        let mut events = self.events.write().await;
        let outcome = match events.get(event_id) {
            Some(existing) => existing.contend(now, lease),
            None => ClaimOutcome::Claimed,
        };
        if outcome == ClaimOutcome::Claimed {
            events.insert(
                event_id.to_string(),
                ProcessedEventRecord::claim(event_id, event_type, now),
            );
        }
        Ok(outcome)
    }

    async fn complete(&self, event_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut events = self.events.write().await;
        let record = events
            .get_mut(event_id)
            .ok_or_else(|| PaymentError::NotFound(format!("claim for event {event_id}")))?;
        record.complete(now);
        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<()> {
        let mut events = self.events.write().await;
        if events
            .get(event_id)
            .is_some_and(|r| r.state == LedgerState::InProgress)
        {
            events.remove(event_id);
        }
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<ProcessedEventRecord>> {
        let events = self.events.read().await;
        Ok(events.get(event_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Records every published message; can be switched to fail for outage scenarios.
#[derive(Default, Clone)]
pub struct InMemoryEventBus {
    messages: Arc<RwLock<Vec<PublishedMessage>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.read().await.clone()
    }

    pub async fn routing_keys(&self) -> Vec<String> {
        self.messages
            .read()
            .await
            .iter()
            .map(|m| m.routing_key.clone())
            .collect()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("message bus unavailable".to_string()));
        }
        self.messages.write().await.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// Stand-in for the shop service: a fixed service catalog and the appointments marked paid.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    services: Arc<RwLock<HashMap<Uuid, ServiceDetails>>>,
    paid_appointments: Arc<RwLock<Vec<Uuid>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_service(&self, service_id: Uuid, details: ServiceDetails) {
        self.services.write().await.insert(service_id, details);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn paid_appointments(&self) -> Vec<Uuid> {
        self.paid_appointments.read().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("shop service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn service_details(&self, service_id: Uuid) -> Result<Option<ServiceDetails>> {
        self.check_available()?;
        Ok(self.services.read().await.get(&service_id).cloned())
    }

    async fn mark_appointment_paid(&self, appointment_id: Uuid) -> Result<()> {
        self.check_available()?;
        self.paid_appointments.write().await.push(appointment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::NewPayment;
    use crate::domain::payment::PaymentStatus;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::create(
            NewPayment {
                buyer_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                appointment_id: Some(Uuid::new_v4()),
                service_id: None,
                amount: Amount::new(dec!(1000)).unwrap(),
                currency: Currency::new("eur").unwrap(),
                commission_rate: dec!(5),
            },
            Utc::now(),
            Duration::hours(48),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_payment_store_compare_and_swap() {
        let store = InMemoryPaymentStore::new();
        let original = payment();
        store.insert(original.clone()).await.unwrap();

        let mut first = original.clone();
        first.status = PaymentStatus::Completed;
        let saved = store.update(first).await.unwrap();
        assert_eq!(saved.version, 1);

        // A second writer still holding version 0 loses.
        let mut stale = original.clone();
        stale.status = PaymentStatus::Cancelled;
        let err = store.update(stale).await.unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(_)));

        let stored = store.get(original.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_payment_store_lookups() {
        let store = InMemoryPaymentStore::new();
        let mut p = payment();
        p.checkout_session_id = Some("cs_1".into());
        p.payment_intent_id = Some("pi_1".into());
        store.insert(p.clone()).await.unwrap();

        assert_eq!(store.find_by_checkout_session("cs_1").await.unwrap(), Some(p.clone()));
        assert_eq!(store.find_by_payment_intent("pi_1").await.unwrap(), Some(p.clone()));
        assert_eq!(
            store
                .find_by_appointment(p.appointment_id.unwrap())
                .await
                .unwrap(),
            Some(p.clone())
        );
        assert!(store.find_by_checkout_session("cs_2").await.unwrap().is_none());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payment_store_rejects_duplicate_session() {
        let store = InMemoryPaymentStore::new();
        let mut a = payment();
        a.checkout_session_id = Some("cs_dup".into());
        store.insert(a).await.unwrap();

        let mut b = payment();
        b.checkout_session_id = Some("cs_dup".into());
        assert!(matches!(
            store.insert(b).await,
            Err(PaymentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_store_rejects_duplicate_intent() {
        let store = InMemoryPaymentStore::new();
        let mut a = payment();
        a.payment_intent_id = Some("pi_same".into());
        store.insert(a).await.unwrap();

        let mut b = payment();
        b.payment_intent_id = Some("pi_same".into());
        assert!(matches!(
            store.insert(b.clone()).await,
            Err(PaymentError::Conflict(_))
        ));

        // Linking the intent on a later update is refused too.
        b.payment_intent_id = None;
        store.insert(b.clone()).await.unwrap();
        b.payment_intent_id = Some("pi_same".into());
        assert!(matches!(
            store.update(b.clone()).await,
            Err(PaymentError::Conflict(_))
        ));
        let stored = store.get(b.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_intent_id, None);
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_account_store_uniqueness() {
        let store = InMemoryConnectedAccountStore::new();
        let shop = Uuid::new_v4();
        store
            .insert(ConnectedAccount::new(shop, "acct_1".into(), Utc::now()))
            .await
            .unwrap();

        let again = store
            .insert(ConnectedAccount::new(shop, "acct_2".into(), Utc::now()))
            .await;
        assert!(matches!(again, Err(PaymentError::Conflict(_))));

        let reused = store
            .insert(ConnectedAccount::new(Uuid::new_v4(), "acct_1".into(), Utc::now()))
            .await;
        assert!(matches!(reused, Err(PaymentError::Conflict(_))));

        assert_eq!(
            store.get_by_account_id("acct_1").await.unwrap().unwrap().shop_id,
            shop
        );
    }

    #[tokio::test]
    async fn test_ledger_claim_lifecycle() {
        let ledger = InMemoryProcessedEventStore::new();
        let now = Utc::now();
        let lease = Duration::seconds(300);

        assert_eq!(
            ledger.try_claim("evt_1", "charge.refunded", now, lease).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            ledger.try_claim("evt_1", "charge.refunded", now, lease).await.unwrap(),
            ClaimOutcome::InFlight
        );

        ledger.release("evt_1").await.unwrap();
        assert_eq!(
            ledger.try_claim("evt_1", "charge.refunded", now, lease).await.unwrap(),
            ClaimOutcome::Claimed
        );

        ledger.complete("evt_1", now).await.unwrap();
        ledger.release("evt_1").await.unwrap();
        assert_eq!(
            ledger.try_claim("evt_1", "charge.refunded", now, lease).await.unwrap(),
            ClaimOutcome::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn test_ledger_reclaims_expired_lease() {
        let ledger = InMemoryProcessedEventStore::new();
        let now = Utc::now();
        let lease = Duration::seconds(300);

        ledger.try_claim("evt_1", "account.updated", now, lease).await.unwrap();
        let later = now + Duration::seconds(301);
        assert_eq!(
            ledger.try_claim("evt_1", "account.updated", later, lease).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            ledger.get("evt_1").await.unwrap().unwrap().claimed_at,
            later
        );
    }

    #[tokio::test]
    async fn test_event_bus_failure_toggle() {
        let bus = InMemoryEventBus::new();
        bus.publish("x", "payment.completed", b"{}").await.unwrap();
        bus.set_failing(true);
        assert!(bus.publish("x", "payment.refunded", b"{}").await.is_err());
        assert_eq!(bus.routing_keys().await, vec!["payment.completed".to_string()]);
    }
}
