//! In-process metrics, rendered as Prometheus text on demand.

pub mod metrics;

pub use metrics::EngineMetrics;
