use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the worker should do with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Invoice,
    Confirmation,
    Notification,
    /// Any kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Invoice => "invoice",
            JobKind::Confirmation => "confirmation",
            JobKind::Notification => "notification",
            JobKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to render a receipt without reading the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub payment_reference: String,
    pub amount_minor_units: i64,
    pub settlement_amount: Decimal,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One unit of work for the notification worker. Serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub recipient: String,
    pub subject: String,
    pub kind: JobKind,
    pub payload: JobPayload,
}
