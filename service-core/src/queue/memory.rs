//! In-process broker for tests and local runs without RabbitMQ.

use super::broker::{Broker, BrokerSession, Delivery, DeliveryStream};
use super::{NotificationJob, QueueError};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, watch};

/// A single durable queue held in memory.
///
/// Messages survive session loss, as they would on a real broker. Rejected
/// messages are kept for inspection.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

struct BrokerState {
    shared: Mutex<Shared>,
    ready: Notify,
}

struct Shared {
    available: bool,
    queue: VecDeque<Vec<u8>>,
    rejected: Vec<Vec<u8>>,
    acked: usize,
    connect_attempts: u32,
    connects: u32,
    sessions: Vec<Arc<watch::Sender<bool>>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                shared: Mutex::new(Shared {
                    available: true,
                    queue: VecDeque::new(),
                    rejected: Vec::new(),
                    acked: 0,
                    connect_attempts: 0,
                    connects: 0,
                    sessions: Vec::new(),
                }),
                ready: Notify::new(),
            }),
        }
    }

    /// While unavailable, new connections are refused. Live sessions stay up.
    pub async fn set_available(&self, available: bool) {
        self.state.shared.lock().await.available = available;
    }

    /// Drops every live session, as a broker restart would.
    pub async fn disconnect(&self) {
        let sessions = std::mem::take(&mut self.state.shared.lock().await.sessions);
        for session in sessions {
            session.send_replace(true);
        }
    }

    pub async fn enqueue(&self, job: &NotificationJob) {
        // Serializing a job cannot fail: every field is plain data.
        if let Ok(body) = serde_json::to_vec(job) {
            self.push_raw(body).await;
        }
    }

    pub async fn push_raw(&self, body: Vec<u8>) {
        self.state.shared.lock().await.queue.push_back(body);
        self.state.ready.notify_one();
    }

    /// Jobs published but not yet delivered.
    pub async fn pending_jobs(&self) -> Vec<NotificationJob> {
        self.state
            .shared
            .lock()
            .await
            .queue
            .iter()
            .filter_map(|body| serde_json::from_slice(body).ok())
            .collect()
    }

    pub async fn rejected(&self) -> Vec<Vec<u8>> {
        self.state.shared.lock().await.rejected.clone()
    }

    pub async fn acked(&self) -> usize {
        self.state.shared.lock().await.acked
    }

    /// Successful connections.
    pub async fn connect_count(&self) -> u32 {
        self.state.shared.lock().await.connects
    }

    /// All connection attempts, including refused ones.
    pub async fn connect_attempts(&self) -> u32 {
        self.state.shared.lock().await.connect_attempts
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, QueueError> {
        let mut shared = self.state.shared.lock().await;
        shared.connect_attempts += 1;

        if !shared.available {
            return Err(QueueError::Connection("connection refused".to_string()));
        }

        let (lost_tx, lost_rx) = watch::channel(false);
        let lost_tx = Arc::new(lost_tx);
        shared.connects += 1;
        shared.sessions.push(lost_tx.clone());

        Ok(Arc::new(InMemorySession {
            state: self.state.clone(),
            lost_tx,
            lost_rx,
        }))
    }
}

struct InMemorySession {
    state: Arc<BrokerState>,
    lost_tx: Arc<watch::Sender<bool>>,
    lost_rx: watch::Receiver<bool>,
}

impl InMemorySession {
    fn is_lost(&self) -> bool {
        *self.lost_rx.borrow()
    }
}

#[async_trait]
impl BrokerSession for InMemorySession {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        if self.is_lost() {
            return Err(QueueError::Publish("session closed".to_string()));
        }
        self.state.shared.lock().await.queue.push_back(payload);
        self.state.ready.notify_one();
        Ok(())
    }

    async fn consume(&self, _prefetch: u16) -> Result<DeliveryStream, QueueError> {
        if self.is_lost() {
            return Err(QueueError::Consume("session closed".to_string()));
        }

        let seed = (self.state.clone(), self.lost_rx.clone());
        let deliveries = futures::stream::unfold(seed, |(state, mut lost)| async move {
            loop {
                let is_lost = *lost.borrow_and_update();
                if is_lost {
                    return None;
                }

                let next = state.shared.lock().await.queue.pop_front();
                if let Some(body) = next {
                    let delivery = InMemoryDelivery {
                        body,
                        state: state.clone(),
                        lost: lost.clone(),
                    };
                    return Some((Ok(Box::new(delivery) as Box<dyn Delivery>), (state, lost)));
                }

                tokio::select! {
                    _ = state.ready.notified() => {}
                    changed = lost.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        });

        Ok(deliveries.boxed())
    }

    async fn closed(&self) {
        let mut lost = self.lost_rx.clone();
        loop {
            let is_lost = *lost.borrow_and_update();
            if is_lost {
                return;
            }
            if lost.changed().await.is_err() {
                return;
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.lost_tx.send_replace(true);
        Ok(())
    }
}

struct InMemoryDelivery {
    body: Vec<u8>,
    state: Arc<BrokerState>,
    lost: watch::Receiver<bool>,
}

impl InMemoryDelivery {
    /// Settling on a dead session fails and the message goes back to the
    /// head of the queue, as an unacknowledged message would on RabbitMQ.
    async fn ensure_open(&self) -> Result<(), QueueError> {
        if !*self.lost.borrow() {
            return Ok(());
        }
        self.state.shared.lock().await.queue.push_front(self.body.clone());
        self.state.ready.notify_one();
        Err(QueueError::Acknowledge("session closed".to_string()))
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.ensure_open().await?;
        self.state.shared.lock().await.acked += 1;
        Ok(())
    }

    async fn reject(&self) -> Result<(), QueueError> {
        self.ensure_open().await?;
        self.state.shared.lock().await.rejected.push(self.body.clone());
        Ok(())
    }
}
