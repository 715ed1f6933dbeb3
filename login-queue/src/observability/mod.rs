pub mod metrics;

#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use metrics::{MetricsRegistry, MetricsSnapshot, QueueMetrics, TimingSnapshot};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::{init_tracing, LogFormat};
