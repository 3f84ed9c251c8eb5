//! Bounded execution of synchronous collaborator calls.

use std::time::Duration;

use crate::error::PipelineError;

pub(crate) enum Bounded<T> {
    Finished(T),
    TimedOut,
}

/// Run `work` on the blocking pool, giving up after `limit`.
///
/// A timed-out call is detached rather than aborted; it may still finish in
/// the background but its result is dropped.
pub(crate) async fn run_bounded<T, F>(
    label: &str,
    limit: Duration,
    work: F,
) -> Result<Bounded<T>, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(value)) => Ok(Bounded::Finished(value)),
        Ok(Err(join_err)) => Err(PipelineError::Infrastructure(anyhow::anyhow!(
            "{label} task panicked: {join_err}"
        ))),
        Err(_) => Ok(Bounded::TimedOut),
    }
}
