pub mod invoice;
pub mod metrics;
pub mod providers;
pub mod worker;

pub use invoice::render_invoice;
pub use metrics::init_metrics;
pub use providers::{
    EmailMessage, EmailProvider, MockEmailProvider, ProviderError, ProviderResponse, SmtpProvider,
};
pub use worker::InvoiceWorker;
