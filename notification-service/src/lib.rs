pub mod config;
pub mod services;
pub mod startup;

pub use startup::{shutdown_signal, Worker};
