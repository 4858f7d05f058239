//! Video counter service
//!
//! Views, likes, and per-user category affinity are written to the cache as
//! atomic deltas and folded into PostgreSQL by the aggregation scheduler.
//! Thumbnail URLs are presigned on demand and cached below their expiry.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;
pub mod workers;

pub use config::Config;
pub use error::{AppError, Result};
