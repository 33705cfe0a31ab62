//! Diagnostics invocation with in-cycle retries.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::domain::errors::DiagnosticsError;
use crate::domain::models::{ConvergenceMetrics, DiagnosticsConfig};
use crate::domain::ports::{DiagnosticsCollector, DiagnosticsRequest};

/// Result of one poll cycle's diagnostics, with the number of collector calls made
pub(super) struct DiagnosticsAttempt {
    pub result: Result<ConvergenceMetrics, DiagnosticsError>,
    pub attempts: u32,
}

/// Call the collector, retrying transient errors with exponential backoff.
///
/// At most `transient_retries + 1` calls are made. Fatal errors are returned
/// immediately.
pub(super) async fn collect_with_retry(
    collector: &dyn DiagnosticsCollector,
    config: &DiagnosticsConfig,
    request: &DiagnosticsRequest,
) -> DiagnosticsAttempt {
    let attempts = AtomicU32::new(0);
    let max_attempts = config.transient_retries.saturating_add(1);

    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.retry_initial_backoff_ms))
        .with_max_interval(Duration::from_millis(config.retry_max_backoff_ms))
        .with_max_elapsed_time(None)
        .build();

    let counter = &attempts;
    let operation = move || async move {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        match collector.compute(request).await {
            Ok(metrics) => Ok(metrics),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                Err(backoff::Error::transient(err))
            }
            Err(err) => Err(backoff::Error::permanent(err)),
        }
    };

    let result = backoff::future::retry_notify(policy, operation, |err: DiagnosticsError, wait: Duration| {
        warn!(
            error = %err,
            retry_in_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            "Transient diagnostics failure, retrying"
        );
    })
    .await;

    DiagnosticsAttempt {
        result,
        attempts: attempts.into_inner(),
    }
}
