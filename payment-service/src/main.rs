use payment_service::{config::Config, services::init_metrics, shutdown_signal, Application};
use service_core::config::ObservabilityConfig;
use service_core::observability::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let observability = ObservabilityConfig::load()?;
    init_tracing(
        "payment-service",
        &observability.log_level,
        observability.otlp_endpoint.as_deref(),
    );
    init_metrics();

    let config = Config::from_env()?;
    tracing::info!(environment = config.environment.as_str(), "Starting payment-service");

    let application = Application::build(config).await?;

    let shutdown = application.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    application.run_until_stopped().await?;

    shutdown_tracing();
    Ok(())
}
