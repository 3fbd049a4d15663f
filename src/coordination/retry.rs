//! Retry policies built on `backon`.
//!
//! Leased partitions are never retried: losing a conditional write means
//! someone else owns the partition. Shared global state is different. Any
//! node may bump a counter, so a lost write there only means "re-read and
//! try again".
//!
//! # Available Policies
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `conditional_update_policy` | 20ms | 2s | 8 | GlobalState read-modify-write |

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use super::error::CoordinationError;

/// Policy for read-modify-write on contended global state.
///
/// Short initial delay so that a handful of writers settle quickly, with
/// jitter so they do not retry in lockstep.
pub fn conditional_update_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(8)
        .with_jitter()
}

/// Run a read-modify-write, retrying only lost conditional writes.
///
/// `operation` must re-read the record on every attempt.
pub async fn with_conditional_update_policy<F, Fut, T>(operation: F) -> Result<T, CoordinationError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoordinationError>>,
{
    operation
        .retry(conditional_update_policy())
        .when(CoordinationError::is_conditional_write_lost)
        .notify(|_, delay| {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Retrying lost conditional write");
        })
        .await
}
