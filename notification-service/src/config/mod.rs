use secrecy::{ExposeSecret, Secret};
use service_core::config::{get_env, parse_env, AppEnvironment, ObservabilityConfig};
use service_core::error::AppError;
use service_core::queue::QueueSettings;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment: AppEnvironment,
    pub observability: ObservabilityConfig,
    pub queue: QueueSettings,
    pub smtp: SmtpConfig,
    /// Prometheus scrape port; 0 keeps metrics in-process only.
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (usually port 465) instead of STARTTLS.
    pub secure: bool,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
}

impl SmtpConfig {
    /// Without credentials the worker logs mail instead of sending it.
    pub fn enabled(&self) -> bool {
        !self.user.is_empty() && !self.password.expose_secret().is_empty()
    }
}

impl WorkerConfig {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_env();
        let is_prod = environment.is_production();

        Ok(WorkerConfig {
            environment,
            observability: ObservabilityConfig::load()?,
            queue: QueueSettings::from_env()?,
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), false)?,
                port: parse_env("SMTP_PORT", 587)?,
                secure: parse_env("SMTP_SECURE", false)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("EMAIL_FROM", Some("noreply@example.com"), false)?,
                from_name: get_env("EMAIL_FROM_NAME", Some("USDC Payments"), false)?,
            },
            metrics_port: parse_env("METRICS_PORT", 9464)?,
        })
    }
}
