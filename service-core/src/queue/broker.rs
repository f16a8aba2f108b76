//! Seams between [`QueueClient`](super::QueueClient) and a concrete broker.

use super::QueueError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>, QueueError>>;

/// Opens sessions against a broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Connects and declares the job queue.
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, QueueError>;
}

/// One live connection plus channel.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Publishes a persistent message onto the job queue.
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Starts a consumer that holds at most `prefetch` unacknowledged messages.
    async fn consume(&self, prefetch: u16) -> Result<DeliveryStream, QueueError>;

    /// Resolves once the session has been lost.
    async fn closed(&self);

    async fn close(&self) -> Result<(), QueueError>;
}

/// A message handed to a consumer, settled exactly once.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn body(&self) -> &[u8];

    async fn ack(&self) -> Result<(), QueueError>;

    /// Rejects without requeue.
    async fn reject(&self) -> Result<(), QueueError>;
}
