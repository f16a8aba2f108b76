//! service-core: Shared infrastructure for the payment intake services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod queue;
pub mod retry;

pub use async_trait;
pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tokio_util;
pub use tower;
pub use tower_http;
pub use tracing;
pub use validator;
