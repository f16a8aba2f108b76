//! Stripe payment provider client.
//!
//! Thin pass-through over the Payment Intents API. Requests are form
//! encoded with bearer auth, as Stripe expects.

use crate::config::StripeConfig;
use crate::models::Metadata;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for a single page of payment intents.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Stripe answered with an error body.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        kind: Option<String>,
        code: Option<String>,
    },

    #[error("payment processor unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Stripe credentials not configured")]
    NotConfigured,

    #[error("unexpected payment processor response: {0}")]
    Decode(String),

    /// Rejected before any request was made.
    #[error("invalid payment intent id: {0}")]
    InvalidId(String),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Api { message, .. } => AppError::PaymentProvider(message),
            GatewayError::NotConfigured => AppError::ServiceUnavailable,
            GatewayError::InvalidId(id) => {
                AppError::BadRequest(anyhow::anyhow!("Invalid payment intent id: {}", id))
            }
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

/// A Stripe PaymentIntent, trimmed to the fields this service reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub created: i64,
}

/// One page of `GET /v1/payment_intents`.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentPage {
    pub data: Vec<PaymentIntent>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Inputs for a USDC purchase intent.
#[derive(Debug, Clone)]
pub struct CreateIntentParams {
    /// Major units, already validated.
    pub amount: f64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub usdc_amount: Decimal,
    pub wallet_address: Option<String>,
}

impl CreateIntentParams {
    /// Stripe form fields for this intent.
    pub fn form(&self) -> Vec<(String, String)> {
        let amount_cents = (self.amount * 100.0).round() as i64;
        let usdc = self.usdc_amount.normalize().to_string();

        let mut fields = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), self.currency.to_lowercase()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
            (
                "description".to_string(),
                format!("USDC Purchase - {} USDC", usdc),
            ),
            ("metadata[usdc_amount]".to_string(), usdc),
            (
                "metadata[wallet_address]".to_string(),
                self.wallet_address
                    .clone()
                    .unwrap_or_else(|| "pending".to_string()),
            ),
            ("metadata[purchase_type]".to_string(), "usdc".to_string()),
        ];

        if let Some(email) = &self.customer_email {
            fields.push(("receipt_email".to_string(), email.clone()));
            fields.push(("metadata[customer_email]".to_string(), email.clone()));
        }

        fields
    }
}

/// Payment processor operations used by the HTTP surface and bulk sync.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, params: &CreateIntentParams)
        -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn confirm_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn cancel_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;

    /// Most recent intents first, at most [`MAX_PAGE_SIZE`].
    async fn list_intents(&self, limit: u32) -> Result<IntentPage, GatewayError>;
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, config })
    }

    /// Check if Stripe is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn execute<T>(&self, request: reqwest::RequestBuilder) -> Result<T, GatewayError>
    where
        T: serde::de::DeserializeOwned,
    {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let response = request
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Stripe response");

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()));
        }

        let detail = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .unwrap_or(StripeErrorDetail {
                message: None,
                kind: None,
                code: None,
            });

        let message = detail
            .message
            .unwrap_or_else(|| format!("request failed with status {}", status));

        tracing::warn!(
            status = %status,
            kind = ?detail.kind,
            code = ?detail.code,
            message = %message,
            "Stripe request rejected"
        );

        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
            kind: detail.kind,
            code: detail.code,
        })
    }
}

/// Path of a single intent, with `suffix` appended.
///
/// Ids come straight from request paths and end up in an authenticated
/// URL, so anything outside `pi_[A-Za-z0-9_]+` is refused.
fn intent_path(id: &str, suffix: &str) -> Result<String, GatewayError> {
    let valid = id
        .strip_prefix("pi_")
        .is_some_and(|rest| {
            !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        });

    if !valid {
        return Err(GatewayError::InvalidId(id.to_string()));
    }
    Ok(format!("/v1/payment_intents/{}{}", id, suffix))
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_intent(
        &self,
        params: &CreateIntentParams,
    ) -> Result<PaymentIntent, GatewayError> {
        let request = self
            .client
            .post(self.url("/v1/payment_intents"))
            .form(&params.form());

        let intent: PaymentIntent = self.execute(request).await?;
        tracing::info!(
            payment_intent_id = %intent.id,
            amount = intent.amount,
            currency = %intent.currency,
            "Payment intent created"
        );
        Ok(intent)
    }

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        let request = self
            .client
            .get(self.url(&intent_path(id, "")?));
        self.execute(request).await
    }

    async fn confirm_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        let request = self
            .client
            .post(self.url(&intent_path(id, "/confirm")?));
        self.execute(request).await
    }

    async fn cancel_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        let request = self
            .client
            .post(self.url(&intent_path(id, "/cancel")?));
        self.execute(request).await
    }

    async fn list_intents(&self, limit: u32) -> Result<IntentPage, GatewayError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let request = self
            .client
            .get(self.url("/v1/payment_intents"))
            .query(&[("limit", limit)]);
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str, secret: &str) -> StripeConfig {
        StripeConfig {
            secret_key: Secret::new(secret.to_string()),
            publishable_key: "pk_test_123".to_string(),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: base_url.to_string(),
        }
    }

    fn intent_json(id: &str, status: &str) -> serde_json::Value {
        json!({
            "id": id,
            "object": "payment_intent",
            "amount": 2500,
            "currency": "usd",
            "status": status,
            "client_secret": format!("{}_secret_abc", id),
            "metadata": {"usdc_amount": "25"},
            "receipt_email": null,
            "created": 1_700_000_000
        })
    }

    fn params() -> CreateIntentParams {
        CreateIntentParams {
            amount: 25.0,
            currency: "USD".to_string(),
            customer_email: Some("buyer@example.com".to_string()),
            usdc_amount: Decimal::new(2500, 2),
            wallet_address: None,
        }
    }

    #[test]
    fn form_carries_usdc_metadata() {
        let form = params().form();
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("amount"), Some("2500"));
        assert_eq!(get("currency"), Some("usd"));
        assert_eq!(get("description"), Some("USDC Purchase - 25 USDC"));
        assert_eq!(get("metadata[usdc_amount]"), Some("25"));
        assert_eq!(get("metadata[wallet_address]"), Some("pending"));
        assert_eq!(get("metadata[customer_email]"), Some("buyer@example.com"));
        assert_eq!(get("receipt_email"), Some("buyer@example.com"));
    }

    #[test]
    fn form_rounds_fractional_cents() {
        let form = CreateIntentParams {
            amount: 10.555,
            ..params()
        }
        .form();
        assert!(form.contains(&("amount".to_string(), "1056".to_string())));
    }

    #[tokio::test]
    async fn create_intent_posts_form_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(body_string_contains("automatic_payment_methods%5Benabled%5D=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent_json(
                "pi_1",
                "requires_payment_method",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = StripeClient::new(test_config(&server.uri(), "sk_test_123")).unwrap();
        let intent = client.create_intent(&params()).await.unwrap();

        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.client_secret.as_deref(), Some("pi_1_secret_abc"));
        assert_eq!(intent.metadata.get("usdc_amount").map(String::as_str), Some("25"));
    }

    #[tokio::test]
    async fn api_errors_carry_the_stripe_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "message": "No such payment_intent: 'pi_missing'",
                    "type": "invalid_request_error",
                    "code": "resource_missing"
                }
            })))
            .mount(&server)
            .await;

        let client = StripeClient::new(test_config(&server.uri(), "sk_test_123")).unwrap();
        let err = client.retrieve_intent("pi_missing").await.unwrap_err();

        match err {
            GatewayError::Api {
                status,
                message,
                code,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "No such payment_intent: 'pi_missing'");
                assert_eq!(code.as_deref(), Some("resource_missing"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_ids_never_reach_stripe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("pi_1", "succeeded")))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("pi_1", "succeeded")))
            .expect(0)
            .mount(&server)
            .await;

        let client = StripeClient::new(test_config(&server.uri(), "sk_test_123")).unwrap();

        for id in ["../charges/ch_secret", "pi_1/../../v1/charges", "ch_1", "pi_", "pi_1?x=1", ""] {
            assert!(matches!(
                client.retrieve_intent(id).await,
                Err(GatewayError::InvalidId(_))
            ));
            assert!(matches!(
                client.confirm_intent(id).await,
                Err(GatewayError::InvalidId(_))
            ));
            assert!(matches!(
                client.cancel_intent(id).await,
                Err(GatewayError::InvalidId(_))
            ));
        }
    }

    #[test]
    fn intent_path_accepts_stripe_ids() {
        assert_eq!(
            intent_path("pi_3MtwBwLkdIwHu7ix28a3tqPa", "/confirm").unwrap(),
            "/v1/payment_intents/pi_3MtwBwLkdIwHu7ix28a3tqPa/confirm"
        );
    }

    #[tokio::test]
    async fn list_intents_caps_the_page_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [intent_json("pi_1", "succeeded"), intent_json("pi_2", "canceled")],
                "has_more": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StripeClient::new(test_config(&server.uri(), "sk_test_123")).unwrap();
        let page = client.list_intents(500).await.unwrap();

        assert_eq!(page.data.len(), 2);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn unconfigured_client_makes_no_calls() {
        let client = StripeClient::new(test_config("http://127.0.0.1:9", "")).unwrap();
        assert!(!client.is_configured());
        assert!(matches!(
            client.cancel_intent("pi_1").await,
            Err(GatewayError::NotConfigured)
        ));
    }

    #[test]
    fn api_errors_map_to_provider_errors() {
        let err: AppError = GatewayError::Api {
            status: 402,
            message: "Your card was declined.".to_string(),
            kind: Some("card_error".to_string()),
            code: Some("card_declined".to_string()),
        }
        .into();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
