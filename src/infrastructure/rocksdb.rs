use crate::domain::connected_account::ConnectedAccount;
use crate::domain::ledger::{ClaimOutcome, LedgerState, ProcessedEventRecord};
use crate::domain::payment::Payment;
use crate::domain::ports::{ConnectedAccountStore, PaymentStore, ProcessedEventStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for connected accounts, keyed by shop id.
pub const CF_ACCOUNTS: &str = "connected_accounts";
/// Column Family for the webhook dedup ledger, keyed by gateway event id.
pub const CF_EVENTS: &str = "processed_events";
/// Column Family mapping secondary keys to primary keys.
pub const CF_INDEX: &str = "index";

fn session_key(session_id: &str) -> Vec<u8> {
    format!("session:{session_id}").into_bytes()
}

fn intent_key(payment_intent_id: &str) -> Vec<u8> {
    format!("intent:{payment_intent_id}").into_bytes()
}

fn account_key(account_id: &str) -> Vec<u8> {
    format!("account:{account_id}").into_bytes()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_uuid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| PaymentError::Storage(format!("corrupt index entry: {e}")))
}

/// A persistent store for payments, connected accounts and the webhook ledger.
///
/// Each entity lives in its own Column Family. Read-check-write sequences
/// (version checks, uniqueness checks, ledger claims) run under one writer lock and
/// land in a single `WriteBatch`, so they are atomic for every clone of the store.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with the required column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_PAYMENTS, CF_ACCOUNTS, CF_EVENTS, CF_INDEX]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::Storage(format!("column family {name} not found")))
    }

    fn read<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(family)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf(family)?, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    fn payment_via_index(&self, key: &[u8]) -> Result<Option<Payment>> {
        match self.db.get_cf(self.cf(CF_INDEX)?, key)? {
            Some(id) => self.read(CF_PAYMENTS, &id),
            None => Ok(None),
        }
    }

    /// Claims the payment's correlation ids in the index, failing if another payment holds one.
    fn index_payment(&self, batch: &mut WriteBatch, payment: &Payment) -> Result<()> {
        let index = self.cf(CF_INDEX)?;
        let keys = [
            payment.checkout_session_id.as_deref().map(session_key),
            payment.payment_intent_id.as_deref().map(intent_key),
        ];
        for key in keys.into_iter().flatten() {
            if let Some(owner) = self.db.get_cf(index, &key)?
                && decode_uuid(&owner)? != payment.id
            {
                return Err(PaymentError::Conflict(
                    "correlation id already linked to another payment".to_string(),
                ));
            }
            batch.put_cf(index, key, payment.id.as_bytes());
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.writer.lock().await;
        let key = payment.id.as_bytes();
        if self.db.get_pinned_cf(self.cf(CF_PAYMENTS)?, key)?.is_some() {
            return Err(PaymentError::Conflict(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        let mut batch = WriteBatch::default();
        self.index_payment(&mut batch, &payment)?;
        batch.put_cf(self.cf(CF_PAYMENTS)?, key, encode(&payment)?);
        self.db.write(batch)?;
        Ok(())
    }

    async fn update(&self, mut payment: Payment) -> Result<Payment> {
        let _guard = self.writer.lock().await;
        let current: Payment = self
            .read(CF_PAYMENTS, payment.id.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.id)))?;
        if current.version != payment.version {
            return Err(PaymentError::Conflict(format!(
                "payment {} is at version {}, write was based on {}",
                payment.id, current.version, payment.version
            )));
        }
        payment.version += 1;
        let mut batch = WriteBatch::default();
        self.index_payment(&mut batch, &payment)?;
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.id.as_bytes(),
            encode(&payment)?,
        );
        self.db.write(batch)?;
        Ok(payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, id.as_bytes())
    }

    async fn find_by_checkout_session(&self, session_id: &str) -> Result<Option<Payment>> {
        self.payment_via_index(&session_key(session_id))
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>> {
        self.payment_via_index(&intent_key(payment_intent_id))
    }

    async fn find_by_appointment(&self, appointment_id: Uuid) -> Result<Option<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.appointment_id == Some(appointment_id))
            .max_by_key(|p| p.created_at))
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        let mut all: Vec<Payment> = self.scan(CF_PAYMENTS)?;
        all.sort_by_key(|p| (p.created_at, p.id));
        Ok(all)
    }
}

#[async_trait]
impl ConnectedAccountStore for RocksDBStore {
    async fn insert(&self, account: ConnectedAccount) -> Result<()> {
        let _guard = self.writer.lock().await;
        let index = self.cf(CF_INDEX)?;
        let by_account = account_key(&account.account_id);
        if self
            .db
            .get_pinned_cf(self.cf(CF_ACCOUNTS)?, account.shop_id.as_bytes())?
            .is_some()
            || self.db.get_pinned_cf(index, &by_account)?.is_some()
        {
            return Err(PaymentError::Conflict(format!(
                "connected account for shop {} already exists",
                account.shop_id
            )));
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(index, by_account, account.shop_id.as_bytes());
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            account.shop_id.as_bytes(),
            encode(&account)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn save(&self, account: ConnectedAccount) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_INDEX)?,
            account_key(&account.account_id),
            account.shop_id.as_bytes(),
        );
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            account.shop_id.as_bytes(),
            encode(&account)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_by_shop(&self, shop_id: Uuid) -> Result<Option<ConnectedAccount>> {
        self.read(CF_ACCOUNTS, shop_id.as_bytes())
    }

    async fn get_by_account_id(&self, account_id: &str) -> Result<Option<ConnectedAccount>> {
        match self
            .db
            .get_cf(self.cf(CF_INDEX)?, account_key(account_id))?
        {
            Some(shop_id) => self.read(CF_ACCOUNTS, &shop_id),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProcessedEventStore for RocksDBStore {
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome> {
        let _guard = self.writer.lock().await;
        let existing: Option<ProcessedEventRecord> = self.read(CF_EVENTS, event_id.as_bytes())?;
        let outcome = existing.map_or(ClaimOutcome::Claimed, |r| r.contend(now, lease));
        if outcome == ClaimOutcome::Claimed {
            let record = ProcessedEventRecord::claim(event_id, event_type, now);
            self.db
                .put_cf(self.cf(CF_EVENTS)?, event_id.as_bytes(), encode(&record)?)?;
        }
        Ok(outcome)
    }

    async fn complete(&self, event_id: &str, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut record: ProcessedEventRecord = self
            .read(CF_EVENTS, event_id.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("claim for event {event_id}")))?;
        record.complete(now);
        self.db
            .put_cf(self.cf(CF_EVENTS)?, event_id.as_bytes(), encode(&record)?)?;
        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<()> {
        let _guard = self.writer.lock().await;
        let record: Option<ProcessedEventRecord> = self.read(CF_EVENTS, event_id.as_bytes())?;
        if record.is_some_and(|r| r.state == LedgerState::InProgress) {
            self.db.delete_cf(self.cf(CF_EVENTS)?, event_id.as_bytes())?;
        }
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<ProcessedEventRecord>> {
        self.read(CF_EVENTS, event_id.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::{NewPayment, PaymentStatus};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn payment() -> Payment {
        Payment::create(
            NewPayment {
                buyer_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                appointment_id: None,
                service_id: None,
                amount: Amount::new(dec!(10000)).unwrap(),
                currency: Currency::new("eur").unwrap(),
                commission_rate: dec!(5),
            },
            Utc::now(),
            Duration::hours(48),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for family in [CF_PAYMENTS, CF_ACCOUNTS, CF_EVENTS, CF_INDEX] {
            assert!(store.db.cf_handle(family).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_payment_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut p = payment();
        PaymentStore::insert(&store, p.clone()).await.unwrap();

        p.checkout_session_id = Some("cs_1".into());
        p.payment_intent_id = Some("pi_1".into());
        let saved = store.update(p.clone()).await.unwrap();
        assert_eq!(saved.version, 1);

        let by_session = store.find_by_checkout_session("cs_1").await.unwrap().unwrap();
        assert_eq!(by_session, saved);
        let by_intent = store.find_by_payment_intent("pi_1").await.unwrap().unwrap();
        assert_eq!(by_intent.id, p.id);

        // `p` still carries version 0.
        p.status = PaymentStatus::Completed;
        assert!(matches!(
            store.update(p).await,
            Err(PaymentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        let p = payment();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            PaymentStore::insert(&store, p.clone()).await.unwrap();
            store
                .try_claim("evt_1", "charge.refunded", Utc::now(), Duration::seconds(300))
                .await
                .unwrap();
            store.complete("evt_1", Utc::now()).await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(PaymentStore::get(&store, p.id).await.unwrap(), Some(p));
        assert_eq!(
            store
                .try_claim("evt_1", "charge.refunded", Utc::now(), Duration::seconds(300))
                .await
                .unwrap(),
            ClaimOutcome::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn test_rocksdb_account_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let shop = Uuid::new_v4();
        let mut account = ConnectedAccount::new(shop, "acct_1".into(), Utc::now());

        ConnectedAccountStore::insert(&store, account.clone()).await.unwrap();
        assert!(matches!(
            ConnectedAccountStore::insert(&store, account.clone()).await,
            Err(PaymentError::Conflict(_))
        ));

        account.charges_enabled = true;
        store.save(account.clone()).await.unwrap();
        assert_eq!(
            store.get_by_account_id("acct_1").await.unwrap(),
            Some(account)
        );
    }
}
