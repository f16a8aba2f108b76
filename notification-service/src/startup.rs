//! Worker startup and lifecycle management.
//!
//! The worker has no HTTP surface. It consumes the notification queue until
//! its shutdown token is cancelled, then closes the broker session.

use crate::config::WorkerConfig;
use crate::services::{EmailProvider, InvoiceWorker, MockEmailProvider, SmtpProvider};
use service_core::error::AppError;
use service_core::queue::{AmqpBroker, Broker, QueueClient, QueueError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Worker {
    queue: QueueClient,
    handler: Arc<InvoiceWorker>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Connects to RabbitMQ and picks the email provider from configuration.
    pub fn build(config: WorkerConfig) -> Result<Self, AppError> {
        let provider = email_provider(&config)?;
        let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::new(config.queue.clone()));
        Ok(Self::build_with(config, broker, provider))
    }

    pub fn build_with(
        config: WorkerConfig,
        broker: Arc<dyn Broker>,
        provider: Arc<dyn EmailProvider>,
    ) -> Self {
        let queue = QueueClient::connect(broker, config.queue.retry_policy());

        Self {
            queue,
            handler: Arc::new(InvoiceWorker::new(provider)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the worker after the job in flight.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn queue(&self) -> &QueueClient {
        &self.queue
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let stopper = {
            let queue = self.queue.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                queue.close().await;
            })
        };

        tracing::info!("Notification worker started");
        let result = self.queue.consume(self.handler.as_ref()).await;

        self.shutdown.cancel();
        if let Err(e) = stopper.await {
            tracing::warn!("Queue shutdown task failed: {}", e);
        }

        tracing::info!("Notification worker stopped");
        match result {
            Ok(()) | Err(QueueError::Closed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn email_provider(config: &WorkerConfig) -> Result<Arc<dyn EmailProvider>, AppError> {
    if !config.smtp.enabled() {
        if config.environment.is_production() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_USER and SMTP_PASSWORD are required in production"
            )));
        }
        tracing::warn!("SMTP credentials not set, using mock email provider");
        return Ok(Arc::new(MockEmailProvider::new(true)));
    }

    let provider = SmtpProvider::new(config.smtp.clone())
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    tracing::info!(
        host = %config.smtp.host,
        port = config.smtp.port,
        secure = config.smtp.secure,
        "SMTP email provider initialized"
    );
    Ok(Arc::new(provider))
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
