//! sluice-core: Shared plumbing for the sluice ingestion service.
//!
//! - `config/` - Multi-file YAML loading, environment interpolation, CLI config args
//! - `metrics/` - Internal events, `emit!` and the Prometheus HTTP server
//! - `polling` - Generic polling loop trait and runner
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Subscriber initialization
//! - `error` - Config and metrics error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod polling;
pub mod signal;
pub mod tracing;

pub use config::{
    ConfigArgs, ConfigPath, Mergeable, MetricsConfig, interpolate, interpolate_with,
    is_yaml_file, load_from_paths,
};
pub use error::{ConfigError, MetricsError};
pub use metrics::{
    DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics,
    init_test as init_metrics_test,
};
pub use polling::{IterationResult, PollingProcessor, run_polling_loop};
pub use signal::shutdown_signal;
pub use tracing::init_tracing;
