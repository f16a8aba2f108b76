pub mod metrics;
pub mod reconciliation;
pub mod settlement;
pub mod store;
pub mod stripe;
pub mod sync;

pub use metrics::{get_metrics, init_metrics};
pub use reconciliation::{ReconciliationPipeline, ReconciliationReport, StepOutcome, WebhookEvent};
pub use settlement::SettlementService;
pub use store::{InMemoryTransactionStore, PgTransactionStore, StoreError, TransactionStore};
pub use stripe::{GatewayError, PaymentGateway, PaymentIntent, StripeClient};
pub use sync::{SyncReport, SyncService};
