use crate::models::{Metadata, Transaction, TransactionFilter, TransactionStatus};
use crate::services::stripe::PaymentIntent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentRequest {
    #[validate(range(min = 0.5, max = 999999.99, message = "Amount must be between 0.50 and 999999.99"))]
    pub amount: f64,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,
    #[validate(email(message = "Invalid email address"))]
    pub customer_email: Option<String>,
}

fn default_currency() -> String {
    "usd".to_string()
}

/// `data` of the create response. The storefront reads `usdcAmount` as a number.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentResponse {
    pub client_secret: Option<String>,
    pub payment_intent_id: String,
    pub amount: f64,
    #[serde(with = "rust_decimal::serde::float")]
    pub usdc_amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfigResponse {
    pub publishable_key: String,
}

/// Intent as returned by `GET /payments/:id`; amount in major units.
#[derive(Debug, Serialize)]
pub struct PaymentIntentView {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub metadata: Metadata,
    pub created: i64,
}

impl From<PaymentIntent> for PaymentIntentView {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            id: intent.id,
            amount: Decimal::new(intent.amount, 2),
            currency: intent.currency,
            status: intent.status,
            metadata: intent.metadata,
            created: intent.created,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IntentStatusView {
    pub id: String,
    pub status: String,
}

impl From<PaymentIntent> for IntentStatusView {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            id: intent.id,
            status: intent.status,
        }
    }
}

/// `{success: true, data}` envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub customer_email: Option<String>,
    pub status: Option<TransactionStatus>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl ListTransactionsQuery {
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn filter(&self) -> TransactionFilter {
        let limit = self.limit();
        TransactionFilter {
            customer_email: self.customer_email.clone().filter(|e| !e.is_empty()),
            status: self.status,
            limit: i64::from(limit),
            offset: i64::from(self.page() - 1) * i64::from(limit),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let per_page = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            total_pages: (total + per_page - 1) / per_page,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub success: bool,
    pub data: Vec<Transaction>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct StripeListQuery {
    pub status: Option<String>,
    pub customer_email: Option<String>,
    pub limit: Option<u32>,
}

impl StripeListQuery {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    /// Equality match on status and, case-insensitively, on the customer email
    /// held in `receipt_email` or `metadata.customer_email`.
    pub fn matches(&self, intent: &PaymentIntent) -> bool {
        let status_ok = self
            .status
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .is_none_or(|s| intent.status.to_lowercase() == s);

        let email_ok = self
            .customer_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .is_none_or(|wanted| {
                intent
                    .receipt_email
                    .iter()
                    .chain(intent.metadata.get("customer_email"))
                    .any(|email| email.eq_ignore_ascii_case(wanted))
            });

        status_ok && email_ok
    }
}

#[derive(Debug, Serialize)]
pub struct StripeListResponse {
    pub success: bool,
    pub data: Vec<PaymentIntent>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(status: &str, receipt: Option<&str>) -> PaymentIntent {
        PaymentIntent {
            id: "pi_1".to_string(),
            amount: 1000,
            currency: "usd".to_string(),
            status: status.to_string(),
            client_secret: None,
            metadata: Metadata::new(),
            receipt_email: receipt.map(str::to_string),
            description: None,
            created: 0,
        }
    }

    #[test]
    fn amount_bounds_are_validated() {
        let request = |amount: f64| CreatePaymentIntentRequest {
            amount,
            currency: "usd".to_string(),
            customer_email: None,
        };

        assert!(request(0.5).validate().is_ok());
        assert!(request(999999.99).validate().is_ok());
        assert!(request(0.49).validate().is_err());
        assert!(request(1_000_000.0).validate().is_err());
    }

    #[test]
    fn currency_defaults_to_usd() {
        let request: CreatePaymentIntentRequest =
            serde_json::from_str(r#"{"amount": 10, "customerEmail": "a@b.co"}"#).unwrap();
        assert_eq!(request.currency, "usd");
        assert_eq!(request.customer_email.as_deref(), Some("a@b.co"));
    }

    #[test]
    fn list_query_maps_page_to_offset() {
        let query = ListTransactionsQuery {
            customer_email: None,
            status: Some(TransactionStatus::Succeeded),
            page: 3,
            limit: 20,
        };
        let filter = query.filter();
        assert_eq!(filter.limit, 20);
        assert_eq!(filter.offset, 40);
    }

    #[test]
    fn pagination_rounds_total_pages_up() {
        assert_eq!(Pagination::new(1, 50, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 50, 50).total_pages, 1);
        assert_eq!(Pagination::new(1, 50, 51).total_pages, 2);
    }

    #[test]
    fn stripe_filter_matches_status_and_email() {
        let query = StripeListQuery {
            status: Some(" Succeeded ".to_string()),
            customer_email: Some("Buyer@Example.com".to_string()),
            limit: Some(500),
        };

        assert_eq!(query.limit(), MAX_PAGE_SIZE);
        assert!(query.matches(&intent("succeeded", Some("buyer@example.com"))));
        assert!(!query.matches(&intent("canceled", Some("buyer@example.com"))));
        assert!(!query.matches(&intent("succeeded", None)));
    }
}
