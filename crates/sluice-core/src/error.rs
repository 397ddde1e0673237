//! Error types shared by the sluice crates.
//!
//! Configuration and metrics errors live here because both the loader and the
//! ingestion binary surface them at startup.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Landing root is empty.
    #[snafu(display("landing_root cannot be empty"))]
    EmptyLandingRoot,

    /// Bronze root is empty.
    #[snafu(display("bronze_root cannot be empty"))]
    EmptyBronzeRoot,

    /// No clusters configured.
    #[snafu(display("At least one cluster must be configured"))]
    NoClusters,

    /// Extension allow-list is empty.
    #[snafu(display("Extension allow-list cannot be empty"))]
    NoExtensions,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Two clusters resolve to the same input directory.
    #[snafu(display("Resource conflict: {message}"))]
    ResourceConflict { message: String },

    /// Duplicate component keys found across config files.
    #[snafu(display("Duplicate component keys: {}", keys.join(", ")))]
    DuplicateComponents { keys: Vec<String> },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },

    /// Failed to read configuration directory.
    #[snafu(display("Failed to read directory {}", path.display()))]
    ReadDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to parse the metrics bind address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}
