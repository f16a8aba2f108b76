use super::invoice::render_invoice;
use super::providers::EmailProvider;
use async_trait::async_trait;
use metrics::counter;
use service_core::queue::{JobHandler, JobKind, NotificationJob};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Turns queued jobs into emails. Only invoices are sent; other kinds are
/// acknowledged without side effects.
pub struct InvoiceWorker {
    provider: Arc<dyn EmailProvider>,
}

impl InvoiceWorker {
    pub fn new(provider: Arc<dyn EmailProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl JobHandler for InvoiceWorker {
    #[instrument(
        skip(self, job),
        fields(kind = %job.kind, payment_reference = %job.payload.payment_reference)
    )]
    async fn handle(&self, job: NotificationJob) -> anyhow::Result<()> {
        match job.kind {
            JobKind::Invoice => {
                let email = render_invoice(&job);
                match self.provider.send(&email).await {
                    Ok(response) => {
                        counter!("notification_jobs_total", "kind" => job.kind.as_str(), "outcome" => "sent")
                            .increment(1);
                        info!(
                            recipient = %job.recipient,
                            provider_id = ?response.provider_id,
                            "Invoice email sent"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        counter!("notification_jobs_total", "kind" => job.kind.as_str(), "outcome" => "failed")
                            .increment(1);
                        Err(anyhow::anyhow!(e).context("sending invoice email"))
                    }
                }
            }
            other => {
                counter!("notification_jobs_total", "kind" => other.as_str(), "outcome" => "ignored")
                    .increment(1);
                warn!(kind = %other, "Unknown job type, acknowledging without sending");
                Ok(())
            }
        }
    }
}
