//! Common utilities and shared types for taskline.
//!
//! This crate provides foundational components used across all taskline crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: Random queue names via [`IdGenerator`]
//! - **Metrics**: Queue counters via [`QueueMetrics`]
//!
//! # Example
//!
//! ```no_run
//! use taskline_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let name = config
//!         .queue
//!         .name
//!         .clone()
//!         .unwrap_or_else(|| IdGenerator::new().generate_queue_name());
//!     println!("Queue name: {name}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod metrics;

pub use config::{Config, FailurePolicy, FlowConfig, QueueConfig, RedisConfig, ServerConfig};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use metrics::{MetricsSnapshot, QueueMetrics};
