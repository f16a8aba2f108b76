#![allow(dead_code)]

use chrono::Utc;
use notification_service::config::{SmtpConfig, WorkerConfig};
use notification_service::services::MockEmailProvider;
use notification_service::Worker;
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config::{AppEnvironment, ObservabilityConfig};
use service_core::queue::{InMemoryBroker, JobKind, JobPayload, NotificationJob, QueueSettings};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestWorker {
    pub broker: InMemoryBroker,
    pub provider: Arc<MockEmailProvider>,
    pub shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        environment: AppEnvironment::Development,
        observability: ObservabilityConfig::default(),
        queue: QueueSettings {
            reconnect_delay: Duration::from_millis(50),
            ..QueueSettings::default()
        },
        smtp: SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            secure: false,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "noreply@example.com".to_string(),
            from_name: "USDC Payments".to_string(),
        },
        metrics_port: 0,
    }
}

impl TestWorker {
    pub async fn spawn() -> Self {
        let broker = InMemoryBroker::new();
        let provider = Arc::new(MockEmailProvider::new(true));

        let worker = Worker::build_with(test_config(), Arc::new(broker.clone()), provider.clone());
        assert!(
            worker
                .queue()
                .wait_until_connected(Duration::from_secs(2))
                .await,
            "worker never connected to the in-memory broker"
        );

        let shutdown = worker.shutdown_token();
        let handle = tokio::spawn(async move {
            worker
                .run_until_stopped()
                .await
                .expect("worker exited with an error");
        });

        Self {
            broker,
            provider,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Cancels the worker and waits for it to exit.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker did not stop")
                .expect("worker task panicked");
        }
    }
}

impl Drop for TestWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn job(kind: JobKind, reference: &str) -> NotificationJob {
    NotificationJob {
        recipient: "buyer@example.com".to_string(),
        subject: "Payment Invoice - USDC Purchase".to_string(),
        kind,
        payload: JobPayload {
            payment_reference: reference.to_string(),
            amount_minor_units: 2500,
            settlement_amount: Decimal::new(25, 0),
            currency: "usd".to_string(),
            status: "succeeded".to_string(),
            customer_name: None,
            customer_email: Some("buyer@example.com".to_string()),
            created_at: Utc::now(),
        },
    }
}
