use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config::{get_env, optional_env, parse_env, AppEnvironment, ObservabilityConfig};
use service_core::error::AppError;
use service_core::queue::QueueSettings;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub environment: AppEnvironment,
    pub observability: ObservabilityConfig,
    pub stripe: StripeConfig,
    pub usdc: UsdcConfig,
    pub frontend_url: String,
    pub database: DatabaseConfig,
    pub queue: QueueSettings,
    pub webhook: WebhookConfig,
    pub sync: SyncConfig,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub publishable_key: String,
    /// Held for signature verification upstream of this service.
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct UsdcConfig {
    /// USDC credited per unit of fiat.
    pub exchange_rate: Decimal,
    pub wallet_address: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub ssl: bool,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Upper bound on each store or queue call made while handling an event.
    pub side_effect_timeout: Duration,
    /// Lets `failed`/`canceled` events overwrite a `succeeded` transaction.
    pub allow_terminal_overwrite: bool,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub page_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let environment = AppEnvironment::from_env();
        let is_prod = environment.is_production();

        let exchange_rate: Decimal = parse_env("USDC_EXCHANGE_RATE", Decimal::ONE)?;
        if exchange_rate <= Decimal::ZERO {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "USDC_EXCHANGE_RATE must be positive"
            )));
        }

        Ok(Self {
            server: ServerConfig {
                host: get_env("HOST", Some("0.0.0.0"), false)?,
                port: parse_env("PORT", 5000)?,
            },
            environment,
            observability: ObservabilityConfig::load()?,
            stripe: StripeConfig {
                secret_key: Secret::new(get_env("STRIPE_SECRET_KEY", Some(""), is_prod)?),
                publishable_key: get_env("STRIPE_PUBLISHABLE_KEY", Some(""), is_prod)?,
                webhook_secret: Secret::new(get_env("STRIPE_WEBHOOK_SECRET", Some(""), is_prod)?),
                api_base_url: get_env(
                    "STRIPE_API_BASE_URL",
                    Some("https://api.stripe.com"),
                    false,
                )?,
            },
            usdc: UsdcConfig {
                exchange_rate,
                wallet_address: optional_env("USDC_WALLET_ADDRESS"),
            },
            frontend_url: get_env("FRONTEND_URL", Some("http://localhost:3000"), false)?,
            database: DatabaseConfig {
                url: Secret::new(get_env(
                    "DATABASE_URL",
                    Some("postgresql://localhost:5432/stripe_payments"),
                    is_prod,
                )?),
                ssl: parse_env("DATABASE_SSL", false)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 20)?,
                idle_timeout: Duration::from_secs(parse_env("DATABASE_IDLE_TIMEOUT_SECS", 30)?),
                acquire_timeout: Duration::from_secs(parse_env(
                    "DATABASE_ACQUIRE_TIMEOUT_SECS",
                    2,
                )?),
            },
            queue: QueueSettings::from_env()?,
            webhook: WebhookConfig {
                side_effect_timeout: Duration::from_millis(parse_env(
                    "WEBHOOK_SIDE_EFFECT_TIMEOUT_MS",
                    5000,
                )?),
                allow_terminal_overwrite: parse_env("ALLOW_TERMINAL_OVERWRITE", false)?,
            },
            sync: SyncConfig {
                page_limit: parse_env("SYNC_PAGE_LIMIT", 100u32)?.clamp(1, 100),
            },
            service_name: "payment-service".to_string(),
        })
    }
}
