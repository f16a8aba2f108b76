use super::{StoreError, TransactionStore};
use crate::models::{
    NewTransaction, StatusPolicy, Transaction, TransactionFilter, TransactionPatch, UpsertOutcome,
    LEGACY_USDC_AMOUNT_KEY,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process [`TransactionStore`] with the same upsert and policy rules as
/// the PostgreSQL store. Used for tests and local runs without a database.
pub struct InMemoryTransactionStore {
    rows: RwLock<HashMap<String, (u64, Transaction)>>,
    sequence: AtomicU64,
    policy: StatusPolicy,
    unavailable: AtomicBool,
    latency: StdMutex<Option<Duration>>,
}

impl Default for InMemoryTransactionStore {
    fn default() -> Self {
        Self::new(StatusPolicy::default())
    }
}

impl InMemoryTransactionStore {
    pub fn new(policy: StatusPolicy) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            policy,
            unavailable: AtomicBool::new(false),
            latency: StdMutex::new(None),
        }
    }

    /// Every call fails with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every call, to exercise caller timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let latency = self.latency.lock().ok().and_then(|guard| *guard);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn build(record: &NewTransaction) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            payment_reference: record.payment_reference.clone(),
            amount_minor_units: record.amount_minor_units,
            settlement_amount: record.settlement_amount,
            currency_code: record.currency_code.clone(),
            status: record.status,
            customer_email: record.customer_email.clone(),
            customer_name: record.customer_name.clone(),
            metadata: Json(record.metadata.clone()),
            created_at: now,
            updated_at: now,
        }
    }

    fn matches(filter: &TransactionFilter, transaction: &Transaction) -> bool {
        filter
            .customer_email
            .as_ref()
            .is_none_or(|email| transaction.customer_email.as_ref() == Some(email))
            && filter.status.is_none_or(|status| transaction.status == status)
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, record: &NewTransaction) -> Result<Transaction, StoreError> {
        self.gate().await?;

        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.payment_reference) {
            return Err(StoreError::Conflict(record.payment_reference.clone()));
        }

        let transaction = Self::build(record);
        rows.insert(
            record.payment_reference.clone(),
            (self.next_sequence(), transaction.clone()),
        );
        Ok(transaction)
    }

    async fn update(
        &self,
        payment_reference: &str,
        patch: &TransactionPatch,
    ) -> Result<Option<Transaction>, StoreError> {
        self.gate().await?;

        if patch.is_empty() {
            return Ok(None);
        }

        let mut rows = self.rows.write().await;
        let Some((_, existing)) = rows.get_mut(payment_reference) else {
            return Ok(None);
        };

        if let Some(status) = patch.status {
            if !self.policy.permits(existing.status, status) {
                return Ok(None);
            }
            existing.status = status;
        }
        if let Some(email) = &patch.customer_email {
            existing.customer_email = Some(email.clone());
        }
        if let Some(name) = &patch.customer_name {
            existing.customer_name = Some(name.clone());
        }
        if let Some(metadata) = &patch.metadata {
            existing.metadata = Json(metadata.clone());
        }
        existing.updated_at = Utc::now();

        Ok(Some(existing.clone()))
    }

    async fn get(&self, payment_reference: &str) -> Result<Option<Transaction>, StoreError> {
        self.gate().await?;
        Ok(self
            .rows
            .read()
            .await
            .get(payment_reference)
            .map(|(_, t)| t.clone()))
    }

    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, StoreError> {
        self.gate().await?;

        let rows = self.rows.read().await;
        let mut matching: Vec<&(u64, Transaction)> = rows
            .values()
            .filter(|(_, t)| Self::matches(filter, t))
            .collect();

        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });

        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn count(&self, filter: &TransactionFilter) -> Result<i64, StoreError> {
        self.gate().await?;

        let rows = self.rows.read().await;
        Ok(rows.values().filter(|(_, t)| Self::matches(filter, t)).count() as i64)
    }

    async fn upsert(&self, record: &NewTransaction) -> Result<UpsertOutcome, StoreError> {
        self.gate().await?;

        let mut rows = self.rows.write().await;
        let Some((_, existing)) = rows.get_mut(&record.payment_reference) else {
            rows.insert(
                record.payment_reference.clone(),
                (self.next_sequence(), Self::build(record)),
            );
            return Ok(UpsertOutcome::Inserted);
        };

        let mut merged_metadata = existing.metadata.0.clone();
        merged_metadata.remove(LEGACY_USDC_AMOUNT_KEY);
        merged_metadata.extend(record.metadata.clone());

        let candidate = Transaction {
            amount_minor_units: record.amount_minor_units,
            currency_code: record.currency_code.clone(),
            status: record.status,
            customer_email: record
                .customer_email
                .clone()
                .or_else(|| existing.customer_email.clone()),
            customer_name: record
                .customer_name
                .clone()
                .or_else(|| existing.customer_name.clone()),
            metadata: Json(merged_metadata),
            ..existing.clone()
        };

        if candidate == *existing || !self.policy.permits(existing.status, record.status) {
            return Ok(UpsertOutcome::Unchanged);
        }

        *existing = Transaction {
            updated_at: Utc::now(),
            ..candidate
        };
        Ok(UpsertOutcome::Updated)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.gate().await
    }
}
