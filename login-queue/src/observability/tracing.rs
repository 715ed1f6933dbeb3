//! Subscriber setup for binaries embedding the queue.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{QueueError, QueueResult};

/// Output format of [`init_tracing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` when the variable is unset.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> QueueResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| QueueError::Config {
            key: "RUST_LOG".to_string(),
            reason: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|e| QueueError::Internal(format!("Tracing already initialized: {}", e)))
}
