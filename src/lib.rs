#![forbid(unsafe_code)]

//! Incremental streaming response aggregator.
//!
//! Turns bursty producer fragments into a rate-shaped sequence of SSE
//! frames for a single consumer, ending in exactly one terminal frame.

pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod stream;
pub mod transport;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
