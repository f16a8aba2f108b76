use super::broker::{Broker, BrokerSession, Delivery, DeliveryStream};
use super::{NotificationJob, QueueError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::StreamExt;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One job in flight per consumer.
const PREFETCH: u16 = 1;

type SessionSlot = Arc<RwLock<Option<Arc<dyn BrokerSession>>>>;

/// Processes one job. `Ok` acknowledges it, `Err` rejects it without requeue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: NotificationJob) -> anyhow::Result<()>;
}

/// Reconnecting client for the notification queue.
///
/// Cheap to clone; all clones share one broker session.
#[derive(Clone)]
pub struct QueueClient {
    inner: Arc<Inner>,
}

struct Inner {
    slot: SessionSlot,
    generation: Arc<watch::Sender<u64>>,
    shutdown: CancellationToken,
    /// Held shared by consumers from receipt of a delivery until it is
    /// settled; `close` takes it exclusively before tearing the session down.
    settling: RwLock<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    policy: RetryPolicy,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl QueueClient {
    /// Starts connecting in the background and returns immediately.
    ///
    /// Lost sessions are re-established after the policy's delay. Must be
    /// called from within a Tokio runtime.
    pub fn connect(broker: Arc<dyn Broker>, policy: RetryPolicy) -> Self {
        let slot: SessionSlot = Arc::new(RwLock::new(None));
        let (generation, _) = watch::channel(0u64);
        let generation = Arc::new(generation);
        let shutdown = CancellationToken::new();

        let supervisor = tokio::spawn(supervise(
            broker,
            policy.clone(),
            slot.clone(),
            generation.clone(),
            shutdown.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                slot,
                generation,
                shutdown,
                settling: RwLock::new(()),
                supervisor: Mutex::new(Some(supervisor)),
                policy,
            }),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.slot.read().await.is_some()
    }

    /// Waits up to `timeout` for a session. Returns whether one exists.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut generations = self.inner.generation.subscribe();

        let wait = async {
            loop {
                if self.is_connected().await {
                    return;
                }
                if generations.changed().await.is_err() {
                    return;
                }
            }
        };

        let _ = tokio::time::timeout(timeout, wait).await;
        self.is_connected().await
    }

    /// Publishes a job as a persistent message.
    ///
    /// Fails fast with [`QueueError::NotConnected`] while no session exists.
    #[instrument(skip(self, job), fields(kind = %job.kind, payment_reference = %job.payload.payment_reference))]
    pub async fn submit(&self, job: &NotificationJob) -> Result<(), QueueError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }

        let session = self.current_session().await.ok_or(QueueError::NotConnected)?;
        let payload = serde_json::to_vec(job)?;

        session.publish(payload).await?;

        counter!("queue_jobs_published_total").increment(1);
        debug!("Notification job published");
        Ok(())
    }

    /// Runs `handler` over incoming jobs until [`close`](Self::close) is called.
    ///
    /// Jobs are processed one at a time. After a reconnect the consumer is
    /// registered again on the new session.
    pub async fn consume<H>(&self, handler: &H) -> Result<(), QueueError>
    where
        H: JobHandler + ?Sized,
    {
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }

        let mut generations = self.inner.generation.subscribe();

        loop {
            let generation = *generations.borrow_and_update();
            let mut consumer_ended = false;

            if let Some(session) = self.current_session().await {
                match session.consume(PREFETCH).await {
                    Ok(deliveries) => {
                        info!(generation, "Consuming notification jobs");
                        self.drain(deliveries, handler).await;
                        consumer_ended = true;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to register consumer");
                        consumer_ended = true;
                    }
                }
            }

            if self.inner.shutdown.is_cancelled() {
                return Ok(());
            }

            // A consumer can die while its session survives; retry it after
            // one policy delay unless a new session shows up first.
            let retry_delay = self
                .inner
                .policy
                .next_delay(1)
                .unwrap_or(Duration::from_secs(5));

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Ok(()),
                changed = generations.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(retry_delay), if consumer_ended => {}
            }
        }
    }

    /// Stops reconnecting and releases the session. Safe to call repeatedly.
    ///
    /// A job already handed to a consumer is settled on the open session
    /// before the session is closed.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();

        if let Some(handle) = self.inner.supervisor.lock().await.take() {
            if let Err(e) = handle.await {
                debug!(error = %e, "Queue supervisor ended abnormally");
            }
        }

        let _settled = self.inner.settling.write().await;
        if let Some(session) = self.inner.slot.write().await.take() {
            if let Err(e) = session.close().await {
                debug!(error = %e, "Ignoring error while closing broker session");
            }
            info!("Queue client closed");
        }
    }

    async fn current_session(&self) -> Option<Arc<dyn BrokerSession>> {
        self.inner.slot.read().await.clone()
    }

    async fn drain<H>(&self, mut deliveries: DeliveryStream, handler: &H)
    where
        H: JobHandler + ?Sized,
    {
        loop {
            let _settling = self.inner.settling.read().await;
            let next = tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => settle(&*delivery, handler).await,
                Some(Err(e)) => {
                    warn!(error = %e, "Consumer stream failed");
                    return;
                }
                None => {
                    warn!("Consumer stream ended");
                    return;
                }
            }
        }
    }
}

async fn settle<H>(delivery: &dyn Delivery, handler: &H)
where
    H: JobHandler + ?Sized,
{
    let outcome = match serde_json::from_slice::<NotificationJob>(delivery.body()) {
        Ok(job) => handler.handle(job).await.map_err(|e| format!("{:#}", e)),
        Err(e) => Err(format!("malformed job: {}", e)),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                warn!(error = %e, "Failed to acknowledge job");
            }
        }
        Err(reason) => {
            warn!(reason = %reason, "Rejecting notification job");
            if let Err(e) = delivery.reject().await {
                warn!(error = %e, "Failed to reject job");
            }
        }
    }
}

async fn supervise(
    broker: Arc<dyn Broker>,
    policy: RetryPolicy,
    slot: SessionSlot,
    generation: Arc<watch::Sender<u64>>,
    shutdown: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let attempt = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = broker.connect() => result,
        };

        match attempt {
            Ok(session) => {
                failures = 0;
                *slot.write().await = Some(session.clone());
                generation.send_modify(|g| *g += 1);
                info!("Connected to message broker");

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = session.closed() => {}
                }

                slot.write().await.take();
                counter!("queue_reconnects_total").increment(1);
                warn!("Message broker connection lost");
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to message broker");
            }
        }

        failures += 1;
        let Some(delay) = policy.next_delay(failures) else {
            error!(attempts = failures, "Giving up on message broker");
            break;
        };

        info!(delay_ms = delay.as_millis() as u64, "Reconnecting to message broker");

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("Queue supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryBroker, JobKind, JobPayload};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(kind: JobKind) -> NotificationJob {
        NotificationJob {
            recipient: "buyer@example.com".to_string(),
            subject: "Payment Invoice - USDC Purchase".to_string(),
            kind,
            payload: JobPayload {
                payment_reference: "pi_123".to_string(),
                amount_minor_units: 2500,
                settlement_amount: Decimal::new(2500, 2),
                currency: "usd".to_string(),
                status: "succeeded".to_string(),
                customer_name: None,
                customer_email: Some("buyer@example.com".to_string()),
                created_at: Utc::now(),
            },
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(50))
    }

    #[derive(Default)]
    struct CountingHandler {
        handled: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: NotificationJob) -> anyhow::Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("smtp relay refused");
            }
            Ok(())
        }
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn submit_fails_fast_before_a_session_exists() {
        let broker = InMemoryBroker::new();
        broker.set_available(false).await;
        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());

        let started = std::time::Instant::now();
        let result = client.submit(&job(JobKind::Invoice)).await;

        assert!(matches!(result, Err(QueueError::NotConnected)));
        assert!(started.elapsed() < Duration::from_millis(50));
        client.close().await;
    }

    #[tokio::test]
    async fn submit_publishes_json_jobs() {
        let broker = InMemoryBroker::new();
        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());
        assert!(client.wait_until_connected(Duration::from_secs(1)).await);

        client.submit(&job(JobKind::Invoice)).await.unwrap();

        let pending = broker.pending_jobs().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload.payment_reference, "pi_123");
        client.close().await;
    }

    #[tokio::test]
    async fn reconnects_within_one_backoff_interval() {
        let broker = InMemoryBroker::new();
        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());
        assert!(client.wait_until_connected(Duration::from_secs(1)).await);

        broker.disconnect().await;
        assert!(
            eventually(|| async { !client.is_connected().await }).await,
            "session should be dropped after disconnect"
        );
        assert!(matches!(
            client.submit(&job(JobKind::Invoice)).await,
            Err(QueueError::NotConnected)
        ));

        // 50ms backoff plus scheduling slack.
        assert!(client.wait_until_connected(Duration::from_millis(500)).await);
        assert_eq!(broker.connect_count().await, 2);
        client.submit(&job(JobKind::Invoice)).await.unwrap();
        client.close().await;
    }

    #[tokio::test]
    async fn keeps_retrying_while_broker_is_down() {
        let broker = InMemoryBroker::new();
        broker.set_available(false).await;
        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!client.is_connected().await);
        assert!(broker.connect_attempts().await >= 3);

        broker.set_available(true).await;
        assert!(client.wait_until_connected(Duration::from_millis(500)).await);
        client.close().await;
    }

    #[tokio::test]
    async fn bounded_policy_gives_up() {
        let broker = InMemoryBroker::new();
        broker.set_available(false).await;
        let policy = fast_policy().with_max_attempts(2);
        let client = QueueClient::connect(Arc::new(broker.clone()), policy);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(broker.connect_attempts().await, 3);
        client.close().await;
    }

    #[tokio::test]
    async fn consume_acks_success_and_rejects_failure() {
        let broker = InMemoryBroker::new();
        broker.enqueue(&job(JobKind::Invoice)).await;
        broker.push_raw(b"not json".to_vec()).await;

        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());
        let handler = Arc::new(CountingHandler::default());

        let consumer = {
            let client = client.clone();
            let handler = handler.clone();
            tokio::spawn(async move { client.consume(handler.as_ref()).await })
        };

        assert!(eventually(|| async { broker.acked().await == 1 }).await);
        assert!(eventually(|| async { broker.rejected().await.len() == 1 }).await);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

        client.close().await;
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_failure_rejects_without_requeue() {
        let broker = InMemoryBroker::new();
        broker.enqueue(&job(JobKind::Invoice)).await;

        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());
        let handler = Arc::new(CountingHandler {
            fail: true,
            ..Default::default()
        });

        let consumer = {
            let client = client.clone();
            let handler = handler.clone();
            tokio::spawn(async move { client.consume(handler.as_ref()).await })
        };

        assert!(eventually(|| async { broker.rejected().await.len() == 1 }).await);
        assert_eq!(broker.acked().await, 0);
        assert!(broker.pending_jobs().await.is_empty());

        client.close().await;
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn consumer_resumes_after_reconnect() {
        let broker = InMemoryBroker::new();
        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());
        let handler = Arc::new(CountingHandler::default());

        let consumer = {
            let client = client.clone();
            let handler = handler.clone();
            tokio::spawn(async move { client.consume(handler.as_ref()).await })
        };

        assert!(client.wait_until_connected(Duration::from_secs(1)).await);
        broker.disconnect().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.enqueue(&job(JobKind::Invoice)).await;

        assert!(eventually(|| async { broker.acked().await == 1 }).await);

        client.close().await;
        consumer.await.unwrap().unwrap();
    }

    struct SlowHandler {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn handle(&self, _job: NotificationJob) -> anyhow::Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn close_waits_for_the_job_in_flight() {
        let broker = InMemoryBroker::new();
        broker.enqueue(&job(JobKind::Invoice)).await;

        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());
        let handler = Arc::new(SlowHandler {
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });

        let consumer = {
            let client = client.clone();
            let handler = handler.clone();
            tokio::spawn(async move { client.consume(handler.as_ref()).await })
        };

        tokio::time::timeout(Duration::from_secs(1), handler.started.notified())
            .await
            .expect("handler should start");

        let closing = {
            let client = client.clone();
            tokio::spawn(async move { client.close().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished(), "close must wait for the handler");

        handler.release.notify_one();
        closing.await.unwrap();
        consumer.await.unwrap().unwrap();

        assert_eq!(broker.acked().await, 1);
        assert!(broker.rejected().await.is_empty());
        assert!(broker.pending_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let broker = InMemoryBroker::new();
        let client = QueueClient::connect(Arc::new(broker.clone()), fast_policy());
        client.wait_until_connected(Duration::from_secs(1)).await;

        client.close().await;
        client.close().await;

        assert!(!client.is_connected().await);
        assert!(matches!(
            client.submit(&job(JobKind::Invoice)).await,
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_without_connection_is_harmless() {
        let broker = InMemoryBroker::new();
        broker.set_available(false).await;
        let client = QueueClient::connect(Arc::new(broker), fast_policy());

        client.close().await;
        assert!(!client.is_connected().await);
    }
}
