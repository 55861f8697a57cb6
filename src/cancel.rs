//! Cancellation guard for connect steps.

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{MeetingError, MeetingResult};

/// Run `fut` on its own task. If `cancel` fires first the caller gets
/// `Cancelled` and whatever the task eventually produces is handed to `reap`.
pub(crate) async fn run_guarded<T, F, R, RF>(
    cancel: &CancellationToken,
    fut: F,
    reap: R,
) -> MeetingResult<T>
where
    T: Send + 'static,
    F: Future<Output = MeetingResult<T>> + Send + 'static,
    R: FnOnce(T) -> RF + Send + 'static,
    RF: Future<Output = ()> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(MeetingError::Cancelled);
    }

    let mut pending = tokio::spawn(fut);
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        joined = &mut pending => Some(joined),
    };

    match outcome {
        Some(joined) => joined
            .unwrap_or_else(|e| Err(MeetingError::InvalidState(format!("task failed: {e}")))),
        None => {
            tokio::spawn(async move {
                if let Ok(Ok(value)) = pending.await {
                    reap(value).await;
                }
            });
            Err(MeetingError::Cancelled)
        }
    }
}
