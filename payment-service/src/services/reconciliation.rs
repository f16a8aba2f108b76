//! Webhook reconciliation pipeline.
//!
//! Turns a Stripe event into store writes and an invoice job. Every side
//! effect is bounded by a timeout and reported as its own [`StepOutcome`];
//! none of them can fail the webhook acknowledgement.

use crate::models::{
    Metadata, NewTransaction, TransactionPatch, TransactionStatus, UpsertOutcome,
    LEGACY_USDC_AMOUNT_KEY,
};
use crate::services::settlement::SettlementService;
use crate::services::store::TransactionStore;
use crate::services::stripe::PaymentIntent;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::queue::{JobKind, JobPayload, NotificationJob, QueueClient};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYMENT_CANCELED: &str = "payment_intent.canceled";

pub const INVOICE_SUBJECT: &str = "Payment Invoice - USDC Purchase";
/// Invoice recipient when the intent carries no customer email.
pub const FALLBACK_RECIPIENT: &str = "customer@example.com";

/// Metadata key holding the USDC amount. `usdcAmount` is read for older intents.
pub const USDC_AMOUNT_KEY: &str = "usdc_amount";

/// Inbound event envelope: `{type, data: {object}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn payment_intent(&self) -> Result<PaymentIntent, serde_json::Error> {
        PaymentIntent::deserialize(&self.data.object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Parse,
    Settlement,
    Persist,
    Notify,
    StatusUpdate,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Parse => "parse",
            Step::Settlement => "settlement",
            Step::Persist => "persist",
            Step::Notify => "notify",
            Step::StatusUpdate => "status_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Nothing to do, e.g. no recipient or the row is already current.
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// What happened to one event, step by step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    pub event_type: String,
    pub payment_reference: Option<String>,
    pub steps: Vec<(Step, StepOutcome)>,
}

impl ReconciliationReport {
    fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, step: Step, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    /// The event type was not one this pipeline acts on.
    pub fn is_ignored(&self) -> bool {
        self.steps.is_empty()
    }
}

/// USDC credited for an intent: metadata first, else `amount / 100`.
pub fn settlement_amount(intent: &PaymentIntent) -> Decimal {
    [USDC_AMOUNT_KEY, LEGACY_USDC_AMOUNT_KEY]
        .iter()
        .filter_map(|key| intent.metadata.get(*key))
        .find_map(|raw| Decimal::from_str(raw.trim()).ok())
        .unwrap_or_else(|| Decimal::new(intent.amount, 2))
}

pub fn customer_email(intent: &PaymentIntent) -> Option<String> {
    intent
        .metadata
        .get("customer_email")
        .cloned()
        .or_else(|| intent.receipt_email.clone())
        .filter(|email| !email.trim().is_empty())
}

pub fn created_at(intent: &PaymentIntent) -> DateTime<Utc> {
    DateTime::from_timestamp(intent.created, 0).unwrap_or_else(Utc::now)
}

/// Store record for an intent in the given status.
pub fn transaction_from_intent(intent: &PaymentIntent, status: TransactionStatus) -> NewTransaction {
    let settlement = settlement_amount(intent);

    let mut metadata: Metadata = intent.metadata.clone();
    metadata.remove(LEGACY_USDC_AMOUNT_KEY);
    metadata.insert(USDC_AMOUNT_KEY.to_string(), settlement.normalize().to_string());

    NewTransaction {
        payment_reference: intent.id.clone(),
        amount_minor_units: intent.amount,
        settlement_amount: settlement,
        currency_code: intent.currency.to_lowercase(),
        status,
        customer_email: customer_email(intent),
        customer_name: intent.metadata.get("customer_name").cloned(),
        metadata,
    }
}

pub fn invoice_job(record: &NewTransaction, recipient: String, created_at: DateTime<Utc>) -> NotificationJob {
    NotificationJob {
        recipient,
        subject: INVOICE_SUBJECT.to_string(),
        kind: JobKind::Invoice,
        payload: JobPayload {
            payment_reference: record.payment_reference.clone(),
            amount_minor_units: record.amount_minor_units,
            settlement_amount: record.settlement_amount,
            currency: record.currency_code.clone(),
            status: record.status.to_string(),
            customer_name: record.customer_name.clone(),
            customer_email: record.customer_email.clone(),
            created_at,
        },
    }
}

#[derive(Clone)]
pub struct ReconciliationPipeline {
    store: Arc<dyn TransactionStore>,
    queue: QueueClient,
    settlement: SettlementService,
    side_effect_timeout: Duration,
}

impl ReconciliationPipeline {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        queue: QueueClient,
        settlement: SettlementService,
        side_effect_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            settlement,
            side_effect_timeout,
        }
    }

    /// Handles one event. Never returns an error: failures land in the report.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = ?event.id))]
    pub async fn process(&self, event: &WebhookEvent) -> ReconciliationReport {
        counter!("webhook_events_total", "event_type" => event.event_type.clone()).increment(1);

        let mut report = ReconciliationReport::new(&event.event_type);

        let next_status = match event.event_type.as_str() {
            PAYMENT_SUCCEEDED => TransactionStatus::Succeeded,
            PAYMENT_FAILED => TransactionStatus::Failed,
            PAYMENT_CANCELED => TransactionStatus::Canceled,
            other => {
                info!(event_type = %other, "Unhandled event type");
                return report;
            }
        };

        let intent = match event.payment_intent() {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "Event object is not a payment intent");
                self.fail(&mut report, Step::Parse, e.to_string());
                return report;
            }
        };
        report.payment_reference = Some(intent.id.clone());

        match next_status {
            TransactionStatus::Succeeded => self.on_succeeded(intent, &mut report).await,
            status => self.on_closed(&intent, status, &mut report).await,
        }

        report
    }

    async fn on_succeeded(&self, intent: PaymentIntent, report: &mut ReconciliationReport) {
        let record = transaction_from_intent(&intent, TransactionStatus::Succeeded);
        info!(
            payment_intent_id = %record.payment_reference,
            amount = record.amount_minor_units,
            usdc_amount = %record.settlement_amount,
            "Payment succeeded"
        );

        let settlement = self.settlement.clone();
        let usdc_amount = record.settlement_amount;
        let created_at = created_at(&intent);
        tokio::spawn(async move {
            if let Err(e) = settlement.process(&intent, usdc_amount).await {
                counter!("webhook_side_effect_failures_total", "step" => Step::Settlement.as_str())
                    .increment(1);
                error!(payment_intent_id = %intent.id, error = %e, "Settlement failed");
            }
        });
        report.record(Step::Settlement, StepOutcome::Done);

        let persisted = match self.bounded(Step::Persist, self.store.upsert(&record)).await {
            Ok(UpsertOutcome::Inserted) | Ok(UpsertOutcome::Updated) => StepOutcome::Done,
            Ok(UpsertOutcome::Unchanged) => StepOutcome::Skipped("already up to date".to_string()),
            Err(message) => StepOutcome::Failed(message),
        };
        report.record(Step::Persist, persisted);

        let recipient = record
            .customer_email
            .clone()
            .unwrap_or_else(|| FALLBACK_RECIPIENT.to_string());
        let job = invoice_job(&record, recipient.clone(), created_at);
        let notified = match self.bounded(Step::Notify, self.queue.submit(&job)).await {
            Ok(()) => {
                info!(recipient = %recipient, "Invoice job queued");
                StepOutcome::Done
            }
            Err(message) => StepOutcome::Failed(message),
        };
        report.record(Step::Notify, notified);
    }

    async fn on_closed(
        &self,
        intent: &PaymentIntent,
        status: TransactionStatus,
        report: &mut ReconciliationReport,
    ) {
        warn!(payment_intent_id = %intent.id, status = %status, "Payment did not complete");

        let patch = TransactionPatch::status(status);
        let outcome = match self
            .bounded(Step::StatusUpdate, self.store.update(&intent.id, &patch))
            .await
        {
            Ok(Some(_)) => StepOutcome::Done,
            Ok(None) => {
                info!(
                    payment_intent_id = %intent.id,
                    status = %status,
                    "No updatable transaction; status change skipped"
                );
                StepOutcome::Skipped("no matching transaction or status protected".to_string())
            }
            Err(message) => StepOutcome::Failed(message),
        };
        report.record(Step::StatusUpdate, outcome);
    }

    /// Runs one side effect under the configured timeout.
    async fn bounded<T, E, F>(&self, step: Step, call: F) -> Result<T, String>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        let message = match tokio::time::timeout(self.side_effect_timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.side_effect_timeout.as_millis()),
        };

        counter!("webhook_side_effect_failures_total", "step" => step.as_str()).increment(1);
        error!(step = step.as_str(), error = %message, "Webhook side effect failed");
        Err(message)
    }

    fn fail(&self, report: &mut ReconciliationReport, step: Step, message: String) {
        counter!("webhook_side_effect_failures_total", "step" => step.as_str()).increment(1);
        report.record(step, StepOutcome::Failed(message));
    }
}
