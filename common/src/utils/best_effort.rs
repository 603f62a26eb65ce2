use std::future::Future;

use tracing::warn;

use crate::error::AppError;

/// Run a side effect in the background; a failure is logged, never surfaced.
///
/// Telemetry writes and last-used timestamp touches go through here so the
/// fire-and-forget contract is explicit at the call site.
pub fn spawn_best_effort<F>(label: &'static str, fut: F)
where
    F: Future<Output = Result<(), AppError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            warn!(%label, error = %err, "best-effort side effect failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn test_success_runs_to_completion() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        spawn_best_effort("test", async move {
            ran_clone.store(true, Ordering::SeqCst);
            Ok(())
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_does_not_propagate() {
        // Nothing to assert beyond "does not panic the caller".
        spawn_best_effort("test_failure", async move {
            Err(AppError::InternalError("expected".into()))
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
