//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers;
use crate::models::StatusPolicy;
use crate::services::{
    PaymentGateway, PgTransactionStore, ReconciliationPipeline, SettlementService, StripeClient,
    SyncService, TransactionStore,
};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use service_core::queue::{AmqpBroker, QueueClient};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn TransactionStore>,
    pub queue: QueueClient,
    pub gateway: Arc<dyn PaymentGateway>,
    pub pipeline: ReconciliationPipeline,
    pub sync: SyncService,
}

/// Externally owned resources the application runs on.
pub struct AppDependencies {
    pub store: Arc<dyn TransactionStore>,
    pub queue: QueueClient,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Closed on shutdown when present.
    pub pool: Option<PgPool>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    queue: QueueClient,
    pool: Option<PgPool>,
    shutdown: CancellationToken,
}

impl Application {
    /// Connect to PostgreSQL, RabbitMQ and Stripe, then bind the listener.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let policy = StatusPolicy {
            allow_terminal_overwrite: config.webhook.allow_terminal_overwrite,
        };

        let store = PgTransactionStore::connect(&config.database, policy)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to PostgreSQL: {}", e);
                AppError::from(e)
            })?;
        store.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            AppError::from(e)
        })?;
        let pool = store.pool().clone();

        // Connects in the background; the HTTP server does not wait for RabbitMQ.
        let queue = QueueClient::connect(
            Arc::new(AmqpBroker::new(config.queue.clone())),
            config.queue.retry_policy(),
        );

        let stripe = StripeClient::new(config.stripe.clone())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build Stripe client: {}", e)))?;
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - payment features will be limited");
        }

        Self::build_with(
            config,
            AppDependencies {
                store: Arc::new(store),
                queue,
                gateway: Arc::new(stripe),
                pool: Some(pool),
            },
        )
        .await
    }

    /// Build around caller-supplied dependencies. Port 0 binds a random port.
    pub async fn build_with(config: Config, deps: AppDependencies) -> Result<Self, AppError> {
        let pipeline = ReconciliationPipeline::new(
            deps.store.clone(),
            deps.queue.clone(),
            SettlementService::new(config.usdc.wallet_address.clone()),
            config.webhook.side_effect_timeout,
        );
        let sync = SyncService::new(deps.gateway.clone(), deps.store.clone());

        let state = AppState {
            config: config.clone(),
            store: deps.store,
            queue: deps.queue.clone(),
            gateway: deps.gateway,
            pipeline,
            sync,
        };

        let router = router(state)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Payment service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
            queue: deps.queue,
            pool: deps.pool,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Cancelling this token stops the server gracefully.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown token fires, then close the queue and pool.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = self.shutdown.clone();
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        tracing::info!("HTTP server stopped, releasing resources");
        self.queue.close().await;
        if let Some(pool) = self.pool {
            pool.close().await;
        }

        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

fn router(state: AppState) -> Result<Router, AppError> {
    let origin = HeaderValue::from_str(&state.config.frontend_url).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid FRONTEND_URL: {}", e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Stripe payment intents
        .route("/payments/config", get(handlers::payments::get_config))
        .route(
            "/payments/create-payment-intent",
            post(handlers::payments::create_payment_intent),
        )
        .route("/payments/:id", get(handlers::payments::get_payment_intent))
        .route(
            "/payments/:id/confirm",
            post(handlers::payments::confirm_payment_intent),
        )
        .route(
            "/payments/:id/cancel",
            post(handlers::payments::cancel_payment_intent),
        )
        // Webhooks from Stripe
        .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
        // Transactions
        .route(
            "/transactions",
            get(handlers::transactions::list_transactions),
        )
        .route(
            "/transactions/stripe",
            get(handlers::transactions::list_stripe_transactions),
        )
        .route(
            "/transactions/sync",
            post(handlers::transactions::sync_transactions),
        )
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(cors)
        .layer(from_fn(security_headers_middleware))
        .with_state(state);

    Ok(router)
}

/// Resolves on SIGINT or SIGTERM.
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
