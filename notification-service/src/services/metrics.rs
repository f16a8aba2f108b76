use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder once.
///
/// The worker has no HTTP API, so with a non-zero `port` the exporter runs
/// its own scrape listener on `0.0.0.0:<port>`. Port 0 records without
/// exporting. Must be called inside a Tokio runtime.
pub fn init_metrics(port: u16) -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        if port == 0 {
            return match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(error = %e, "Prometheus recorder already installed; metrics will not be exported");
                    PrometheusBuilder::new().build_recorder().handle()
                }
            };
        }

        let listen = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match PrometheusBuilder::new().with_http_listener(listen).build() {
            Ok((recorder, exporter)) => {
                let handle = recorder.handle();
                if let Err(e) = metrics::set_global_recorder(recorder) {
                    tracing::warn!(error = %e, "Prometheus recorder already installed; metrics will not be exported");
                    return handle;
                }
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::warn!("Metrics exporter stopped");
                    }
                });
                tracing::info!(%listen, "Serving worker metrics");
                handle
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start metrics exporter");
                PrometheusBuilder::new().build_recorder().handle()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_captures_job_outcomes() {
        let handle = init_metrics(0);
        assert!(std::ptr::eq(handle, init_metrics(0)));

        metrics::counter!("notification_jobs_total", "kind" => "invoice", "outcome" => "sent")
            .increment(1);

        assert!(handle.render().contains("notification_jobs_total"));
    }
}
