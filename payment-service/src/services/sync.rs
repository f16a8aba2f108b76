//! Bulk reconciliation from Stripe into the transaction store.

use crate::models::{TransactionStatus, UpsertOutcome};
use crate::services::reconciliation::transaction_from_intent;
use crate::services::store::TransactionStore;
use crate::services::stripe::{GatewayError, PaymentGateway};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncError {
    pub payment_reference: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total: usize,
    /// New rows.
    pub synced: usize,
    pub updated: usize,
    /// Unchanged rows, including those protected by the status policy.
    pub skipped: usize,
    pub errors: Vec<SyncError>,
}

#[derive(Clone)]
pub struct SyncService {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn TransactionStore>,
}

impl SyncService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn TransactionStore>) -> Self {
        Self { gateway, store }
    }

    /// Upserts the most recent `limit` intents. Per-intent failures are
    /// collected; only a failed listing aborts the run.
    #[instrument(skip(self))]
    pub async fn run(&self, limit: u32) -> Result<SyncReport, GatewayError> {
        let page = self.gateway.list_intents(limit).await?;

        let mut report = SyncReport {
            total: page.data.len(),
            ..Default::default()
        };

        for intent in &page.data {
            let status = match TransactionStatus::from_str(&intent.status) {
                Ok(status) => status,
                Err(e) => {
                    warn!(payment_intent_id = %intent.id, error = %e, "Skipping intent");
                    report.errors.push(SyncError {
                        payment_reference: intent.id.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let record = transaction_from_intent(intent, status);
            match self.store.upsert(&record).await {
                Ok(UpsertOutcome::Inserted) => report.synced += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::Unchanged) => report.skipped += 1,
                Err(e) => {
                    warn!(payment_intent_id = %intent.id, error = %e, "Failed to sync intent");
                    report.errors.push(SyncError {
                        payment_reference: intent.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            total = report.total,
            synced = report.synced,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Stripe sync finished"
        );

        Ok(report)
    }
}
