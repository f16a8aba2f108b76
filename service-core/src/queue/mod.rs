//! Notification queue: job wire format and a reconnecting broker client.
//!
//! [`QueueClient`] owns one broker session at a time. A supervisor task
//! re-establishes it after loss following a [`RetryPolicy`](crate::retry::RetryPolicy);
//! callers never block waiting for it.

pub mod amqp;
pub mod broker;
pub mod client;
pub mod job;
pub mod memory;

pub use amqp::AmqpBroker;
pub use broker::{Broker, BrokerSession, Delivery, DeliveryStream};
pub use client::{JobHandler, QueueClient};
pub use job::{JobKind, JobPayload, NotificationJob};
pub use memory::InMemoryBroker;

use crate::config::{get_env, parse_env};
use crate::error::AppError;
use crate::retry::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_QUEUE_NAME: &str = "email_queue";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("not connected to the message broker")]
    NotConnected,

    #[error("queue client is closed")]
    Closed,

    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),

    #[error("invalid job payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Broker connection settings shared by the publisher and the worker.
///
/// Queue arguments are part of the declaration, so both sides must agree on
/// `dead_letter`.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub url: String,
    pub queue_name: String,
    pub dead_letter: bool,
    pub reconnect_delay: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            url: "amqp://localhost".to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            dead_letter: true,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl QueueSettings {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            url: get_env("RABBITMQ_URL", Some("amqp://localhost"), false)?,
            queue_name: get_env("QUEUE_NAME", Some(DEFAULT_QUEUE_NAME), false)?,
            dead_letter: parse_env("QUEUE_DEAD_LETTER", true)?,
            reconnect_delay: Duration::from_secs(parse_env("QUEUE_RECONNECT_DELAY_SECS", 5u64)?),
        })
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dlq", self.queue_name)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.reconnect_delay)
    }
}
