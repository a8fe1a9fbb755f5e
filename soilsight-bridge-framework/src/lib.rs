//! SoilSight Bridge Framework
//!
//! Common abstractions for building field bridges that poll a device and
//! relay its readings upstream.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (logging, signal handling)
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`ShutdownSignal`] for cooperative shutdown on SIGINT/SIGTERM
//! - [`RunStatistics`] for poll-loop counters
//!
//! # Example
//!
//! ```ignore
//! use soilsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!     runner.run(|config, shutdown| my_worker(config, shutdown)).await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;
pub mod shutdown;
mod stats;

pub use args::{BridgeArgs, LogLevel};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use runner::BridgeRunner;
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use stats::{RunStatistics, StatsSnapshot};

// Re-export commonly used types from soilsight-common
pub use soilsight_common::{LogFormat, LoggingConfig, ReadingBatch};
