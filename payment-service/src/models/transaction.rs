use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Processor-attached string context carried with a transaction.
pub type Metadata = BTreeMap<String, String>;

/// Pre-rename spelling of the settlement amount key. Readable, never stored.
pub const LEGACY_USDC_AMOUNT_KEY: &str = "usdcAmount";

/// Payment intent lifecycle, as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Failed,
    Canceled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::RequiresPaymentMethod => "requires_payment_method",
            TransactionStatus::RequiresConfirmation => "requires_confirmation",
            TransactionStatus::RequiresAction => "requires_action",
            TransactionStatus::Processing => "processing",
            TransactionStatus::RequiresCapture => "requires_capture",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown payment status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for TransactionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requires_payment_method" => Ok(TransactionStatus::RequiresPaymentMethod),
            "requires_confirmation" => Ok(TransactionStatus::RequiresConfirmation),
            "requires_action" => Ok(TransactionStatus::RequiresAction),
            "processing" => Ok(TransactionStatus::Processing),
            "requires_capture" => Ok(TransactionStatus::RequiresCapture),
            "succeeded" => Ok(TransactionStatus::Succeeded),
            "failed" | "payment_failed" => Ok(TransactionStatus::Failed),
            "canceled" | "cancelled" => Ok(TransactionStatus::Canceled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Whether a later event may move a transaction out of `succeeded`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    pub allow_terminal_overwrite: bool,
}

impl StatusPolicy {
    pub fn permits(&self, current: TransactionStatus, next: TransactionStatus) -> bool {
        self.allow_terminal_overwrite
            || current != TransactionStatus::Succeeded
            || next == TransactionStatus::Succeeded
    }
}

/// A persisted payment, keyed by the processor's payment reference.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub payment_reference: String,
    pub amount_minor_units: i64,
    pub settlement_amount: Decimal,
    pub currency_code: String,
    pub status: TransactionStatus,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub metadata: Json<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when inserting or upserting a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub payment_reference: String,
    pub amount_minor_units: i64,
    pub settlement_amount: Decimal,
    pub currency_code: String,
    pub status: TransactionStatus,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub metadata: Metadata,
}

/// A partial update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub metadata: Option<Metadata>,
}

impl TransactionPatch {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.customer_email.is_none()
            && self.customer_name.is_none()
            && self.metadata.is_none()
    }
}

/// Exact-match filters plus paging for list and count.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFilter {
    pub customer_email: Option<String>,
    pub status: Option<TransactionStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            customer_email: None,
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// What an upsert did to the row for a payment reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Same data already stored, or the status policy refused the change.
    Unchanged,
}
