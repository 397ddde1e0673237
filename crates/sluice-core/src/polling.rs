//! Generic polling loop trait and runner.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::metrics::events::{IterationCompleted, IterationDuration, IterationResultType};

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// Items were processed successfully.
    ProcessedItems,
    /// No items were available to process.
    NoItems,
    /// Shutdown was requested.
    Shutdown,
}

/// Trait for implementing a polling-based processor.
#[async_trait]
pub trait PollingProcessor {
    /// The state type prepared for each iteration.
    type State: Send;
    /// The error type for this processor.
    type Error: std::error::Error + Send;

    /// Prepare state for a processing iteration.
    ///
    /// Returns `None` if there's no work to do. `cold_start` is true on the
    /// first iteration only.
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Run a polling loop with the given processor until `shutdown` fires or
/// `process` returns [`IterationResult::Shutdown`].
///
/// `name` labels log lines and metrics; `service` identifies the emitting
/// service in metrics.
pub async fn run_polling_loop<P: PollingProcessor + Send>(
    processor: &mut P,
    poll_interval: Duration,
    shutdown: CancellationToken,
    name: &str,
    service: &'static str,
) -> Result<(), P::Error> {
    let mut first_iteration = true;

    loop {
        let iteration_start = Instant::now();
        let cold_start = std::mem::replace(&mut first_iteration, false);

        let state = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(target = name, "Shutdown requested during preparation");
                return Ok(());
            }

            result = processor.prepare(cold_start) => result?,
        };

        let result = match state {
            Some(s) => {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        info!(target = name, "Shutdown requested during processing");
                        IterationResult::Shutdown
                    }

                    result = processor.process(s) => result?,
                }
            }
            None => IterationResult::NoItems,
        };

        let result_type = match result {
            IterationResult::Shutdown => break,
            IterationResult::NoItems => IterationResultType::NoItems,
            IterationResult::ProcessedItems => IterationResultType::Processed,
        };
        emit!(IterationCompleted {
            service,
            result: result_type,
            target: name.to_string(),
        });
        emit!(IterationDuration {
            service,
            duration: iteration_start.elapsed(),
            target: name.to_string(),
        });
        debug!(
            target = name,
            "Iteration complete, waiting {}ms before next poll",
            poll_interval.as_millis()
        );

        if shutdown
            .run_until_cancelled(tokio::time::sleep(poll_interval))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested during poll wait");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(display("never"))]
    struct Never;

    struct Countdown {
        remaining: usize,
        prepared: Vec<bool>,
    }

    #[async_trait]
    impl PollingProcessor for Countdown {
        type State = usize;
        type Error = Never;

        async fn prepare(&mut self, cold_start: bool) -> Result<Option<usize>, Never> {
            self.prepared.push(cold_start);
            Ok((self.remaining > 0).then_some(self.remaining))
        }

        async fn process(&mut self, state: usize) -> Result<IterationResult, Never> {
            self.remaining = state - 1;
            if self.remaining == 0 {
                return Ok(IterationResult::Shutdown);
            }
            Ok(IterationResult::ProcessedItems)
        }
    }

    #[tokio::test]
    async fn test_loop_runs_until_processor_requests_shutdown() {
        crate::metrics::init_test();
        let mut processor = Countdown {
            remaining: 3,
            prepared: Vec::new(),
        };

        run_polling_loop(
            &mut processor,
            Duration::from_millis(1),
            CancellationToken::new(),
            "test",
            "sluice",
        )
        .await
        .unwrap();

        assert_eq!(processor.prepared, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_prepare() {
        let mut processor = Countdown {
            remaining: 3,
            prepared: Vec::new(),
        };
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        run_polling_loop(&mut processor, Duration::from_secs(60), shutdown, "test", "sluice")
            .await
            .unwrap();

        assert!(processor.prepared.is_empty());
    }
}
