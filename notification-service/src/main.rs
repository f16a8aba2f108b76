use notification_service::{config::WorkerConfig, services::init_metrics, shutdown_signal, Worker};
use service_core::observability::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::load()?;
    init_tracing(
        "notification-service",
        &config.observability.log_level,
        config.observability.otlp_endpoint.as_deref(),
    );
    tracing::info!(
        environment = config.environment.as_str(),
        queue = %config.queue.queue_name,
        "Starting notification-service"
    );

    init_metrics(config.metrics_port);
    let worker = Worker::build(config)?;

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    worker.run_until_stopped().await?;

    shutdown_tracing();
    Ok(())
}
