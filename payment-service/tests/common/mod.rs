#![allow(dead_code)]

use payment_service::config::{
    Config, DatabaseConfig, ServerConfig, StripeConfig, SyncConfig, UsdcConfig, WebhookConfig,
};
use payment_service::models::StatusPolicy;
use payment_service::services::{InMemoryTransactionStore, StripeClient, TransactionStore};
use payment_service::startup::{AppDependencies, Application};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::{AppEnvironment, ObservabilityConfig};
use service_core::queue::{InMemoryBroker, QueueClient, QueueSettings};
use service_core::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

pub const TEST_SECRET_KEY: &str = "sk_test_123";
pub const TEST_PUBLISHABLE_KEY: &str = "pk_test_123";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub store: Arc<InMemoryTransactionStore>,
    pub broker: InMemoryBroker,
    pub queue: QueueClient,
    pub stripe: MockServer,
    shutdown: CancellationToken,
}

pub fn test_config(stripe_base_url: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        environment: AppEnvironment::Development,
        observability: ObservabilityConfig::default(),
        stripe: StripeConfig {
            secret_key: Secret::new(TEST_SECRET_KEY.to_string()),
            publishable_key: TEST_PUBLISHABLE_KEY.to_string(),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: stripe_base_url.to_string(),
        },
        usdc: UsdcConfig {
            exchange_rate: Decimal::ONE,
            wallet_address: Some("0xabc123".to_string()),
        },
        frontend_url: "http://localhost:3000".to_string(),
        database: DatabaseConfig {
            url: Secret::new(
                std::env::var("TEST_DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost:5432/stripe_payments_test".to_string()),
            ),
            ssl: false,
            max_connections: 5,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(2),
        },
        queue: QueueSettings::default(),
        webhook: WebhookConfig {
            side_effect_timeout: Duration::from_millis(500),
            allow_terminal_overwrite: false,
        },
        sync: SyncConfig { page_limit: 100 },
        service_name: "payment-service".to_string(),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a tweaked configuration.
    pub async fn spawn_with(customize: impl FnOnce(&mut Config)) -> Self {
        let stripe = MockServer::start().await;
        let mut config = test_config(&stripe.uri());
        customize(&mut config);

        let store = Arc::new(InMemoryTransactionStore::new(StatusPolicy {
            allow_terminal_overwrite: config.webhook.allow_terminal_overwrite,
        }));
        let broker = InMemoryBroker::new();
        let queue = QueueClient::connect(
            Arc::new(broker.clone()),
            RetryPolicy::fixed(Duration::from_millis(50)),
        );
        assert!(
            queue.wait_until_connected(Duration::from_secs(2)).await,
            "queue client never connected"
        );

        let gateway = StripeClient::new(config.stripe.clone()).expect("Failed to build Stripe client");

        let app = Application::build_with(
            config,
            AppDependencies {
                store: store.clone() as Arc<dyn TransactionStore>,
                queue: queue.clone(),
                gateway: Arc::new(gateway),
                pool: None,
            },
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            store,
            broker,
            queue,
            stripe,
            shutdown,
        }
    }

    pub async fn post_webhook(&self, event: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/webhooks/stripe", self.address))
            .header("stripe-signature", "t=1700000000,v1=test")
            .header("content-type", "application/json")
            .body(event.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A Stripe PaymentIntent body.
pub fn payment_intent(id: &str, status: &str, amount: i64, metadata: Value) -> Value {
    json!({
        "id": id,
        "object": "payment_intent",
        "amount": amount,
        "currency": "usd",
        "status": status,
        "client_secret": format!("{}_secret_test", id),
        "metadata": metadata,
        "receipt_email": null,
        "created": 1_700_000_000
    })
}

/// A webhook envelope wrapping a payment intent.
pub fn webhook_event(event_type: &str, intent: Value) -> Value {
    json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "object": "event",
        "type": event_type,
        "data": { "object": intent }
    })
}

pub fn succeeded_event(id: &str, email: &str) -> Value {
    webhook_event(
        "payment_intent.succeeded",
        payment_intent(
            id,
            "succeeded",
            2500,
            json!({"usdc_amount": "25", "customer_email": email, "wallet_address": "0xabc123"}),
        ),
    )
}
