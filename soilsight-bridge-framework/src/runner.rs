//! Bridge runner for lifecycle management.

use std::future::Future;

use soilsight_common::init_tracing;

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::shutdown::{ShutdownSignal, listen_for_signals};

/// Bridge runner that manages the lifecycle of a field bridge.
///
/// Handles:
/// - Logging initialization (config level, optionally overridden on the CLI)
/// - SIGINT/SIGTERM handling
/// - Running the bridge's worker and reporting how it ended
///
/// # Example
///
/// ```ignore
/// use soilsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///
///     runner
///         .run(|config, shutdown| async move {
///             // Worker logic here, returning when `shutdown` fires
///             Ok(())
///         })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// The loaded configuration.
    config: C,
    /// Whether `--dry-run` was given.
    dry_run: bool,
    /// Fires on SIGINT/SIGTERM.
    shutdown: ShutdownSignal,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner with CLI args for log level override.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Install the termination signal handlers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();

        let log_config = config
            .logging()
            .clone()
            .with_level_override(args.and_then(|a| a.log_level).map(|l| l.as_filter()));

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = env!("CARGO_PKG_VERSION"), "Starting bridge");

        let shutdown = listen_for_signals()
            .map_err(|e| BridgeError::with_context("Failed to install signal handlers", e))?;

        Ok(Self {
            name,
            config,
            dry_run: args.is_some_and(|a| a.dry_run),
            shutdown,
        })
    }

    /// True when the bridge should read without publishing.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run the bridge's worker to completion.
    ///
    /// The worker receives the configuration and the shutdown signal and is
    /// expected to return once the signal fires. Its error, if any, is logged
    /// and returned so the caller can exit non-zero.
    pub async fn run<F, Fut>(self, worker: F) -> Result<()>
    where
        F: FnOnce(C, ShutdownSignal) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        tracing::info!(bridge = %self.name, "Bridge running. Press Ctrl+C to stop.");

        let name = self.name;
        let result = worker(self.config, self.shutdown).await;

        match &result {
            Ok(()) => tracing::info!(bridge = %name, "Goodbye!"),
            Err(e) => tracing::error!(bridge = %name, error = %e, "Bridge stopped with error"),
        }

        result
    }
}

