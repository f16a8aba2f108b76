//! RabbitMQ broker over AMQP 0-9-1.

use super::broker::{Broker, BrokerSession, Delivery, DeliveryStream};
use super::{QueueError, QueueSettings};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, options::*,
    types::{AMQPValue, FieldTable},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

const CONSUMER_TAG: &str = "notification-worker";

/// How often a live session checks the connection status.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct AmqpBroker {
    settings: QueueSettings,
}

impl AmqpBroker {
    pub fn new(settings: QueueSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    #[instrument(skip(self), fields(queue = %self.settings.queue_name))]
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, QueueError> {
        let connection = Connection::connect(&self.settings.url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let (lost_tx, lost_rx) = watch::channel(false);
        let lost_tx = Arc::new(lost_tx);

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        declare_queues(&channel, &self.settings).await?;

        info!(dead_letter = self.settings.dead_letter, "AMQP channel ready");

        Ok(Arc::new(AmqpSession {
            connection,
            channel,
            queue_name: self.settings.queue_name.clone(),
            lost_tx,
            lost_rx,
        }))
    }
}

async fn declare_queues(channel: &Channel, settings: &QueueSettings) -> Result<(), QueueError> {
    let mut arguments = FieldTable::default();

    if settings.dead_letter {
        let dead_letter_queue = settings.dead_letter_queue();
        channel
            .queue_declare(
                &dead_letter_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(dead_letter_queue.into()),
        );
    }

    channel
        .queue_declare(
            &settings.queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .map_err(|e| QueueError::Connection(e.to_string()))?;

    Ok(())
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
    queue_name: String,
    lost_tx: Arc<watch::Sender<bool>>,
    lost_rx: watch::Receiver<bool>,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn consume(&self, prefetch: u16) -> Result<DeliveryStream, QueueError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        let deliveries = consumer.map(|item| match item {
            Ok(delivery) => Ok(Box::new(AmqpDelivery(delivery)) as Box<dyn Delivery>),
            Err(e) => Err(QueueError::Consume(e.to_string())),
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
            if !self.connection.status().connected() {
                warn!("AMQP connection lost");
                return;
            }
            tokio::select! {
                changed = lost.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {}
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.lost_tx.send_replace(true);

        let channel_result = self.channel.close(200, "Bye").await;
        let connection_result = self.connection.close(200, "Bye").await;

        channel_result
            .and(connection_result)
            .map_err(|e| QueueError::Connection(e.to_string()))
    }
}

struct AmqpDelivery(lapin::message::Delivery);

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }

    async fn reject(&self) -> Result<(), QueueError> {
        self.0
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }
}
