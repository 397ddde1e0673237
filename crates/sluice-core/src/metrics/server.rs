//! Prometheus metrics infrastructure with singleton-based initialization.
//!
//! The recorder is installed once per process. `init_test()` tolerates
//! concurrent initialization from parallel test threads.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{
    AddressParseSnafu, AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu,
    PrometheusInitSnafu,
};

/// Default metrics address.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Histogram buckets for duration metrics (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Controller for the shared metrics recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)
}

/// Initialize the metrics server for production use.
///
/// Serves on `address`:
/// - `/metrics` - Prometheus metrics in text format
/// - `/health` - returns 200 OK
///
/// plus every route of `extra`, which lets the caller add its own
/// diagnostics endpoints to the same listener.
pub fn init_global(address: &str, extra: Router) -> Result<(), MetricsError> {
    let addr: SocketAddr = address.parse().context(AddressParseSnafu)?;
    let handle = install_recorder()?;

    CONTROLLER
        .set(MetricsController {
            handle: handle.clone(),
        })
        .map_err(|_| AlreadyInitializedSnafu.build())?;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .merge(extra)
        .layer(Extension(handle));

    tokio::spawn(run_server(addr, app));

    info!(%addr, "Metrics server started");
    Ok(())
}

/// Initialize the metrics recorder for tests, without an HTTP endpoint.
///
/// Safe to call repeatedly and from several threads at once.
pub fn init_test() {
    let installed = install_recorder().and_then(|handle| {
        CONTROLLER
            .set(MetricsController { handle })
            .map_err(|_| AlreadyInitializedSnafu.build())
    });
    if installed.is_err() {
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

impl MetricsController {
    /// Get a reference to the global metrics controller.
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

async fn run_server(addr: SocketAddr, app: Router) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;
    use std::thread;

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        assert!(MetricsController::get().is_ok());
    }

    #[test]
    fn test_controller_render() {
        init_test();

        counter!("sluice_test_counter").increment(42);

        let output = MetricsController::get().unwrap().render();
        assert!(output.contains("sluice_test_counter"));
    }

    #[test]
    fn test_concurrent_init_test() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    init_test();
                    MetricsController::get().unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_init_global_rejects_bad_address() {
        let err = init_global("not-an-address", Router::new()).unwrap_err();
        assert!(matches!(err, MetricsError::AddressParse { .. }));
    }
}
