use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::AppError;

/// Cancellation signal and deadline shared by everything done for one request.
#[derive(Clone, Debug)]
pub struct RequestLifecycle {
    token: CancellationToken,
    deadline: Instant,
}

impl RequestLifecycle {
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            deadline: Instant::now() + timeout,
        }
    }

    /// Race `work` against cancellation and the deadline.
    ///
    /// Work that completes first keeps its result; otherwise the request ends
    /// with 408 (cancelled) or 504 (deadline) and `work` is dropped.
    pub async fn watch<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::select! {
            biased;
            result = work => result,
            _ = self.token.cancelled() => Err(AppError::RequestCanceled),
            _ = tokio::time::sleep_until(self.deadline) => Err(AppError::Timeout),
        }
    }

    /// Spawn `work` on the runtime and watch it. A losing task is aborted.
    pub async fn run<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        let mut task = AbortOnDrop(tokio::spawn(work));
        self.watch(async {
            (&mut task.0)
                .await
                .map_err(|e| AppError::Unexpected(format!("query task failed: {}", e)))?
        })
        .await
    }
}

/// Aborts the task when the handle goes away, including when the caller's future is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_work_completes_first() {
        let lifecycle = RequestLifecycle::new(CancellationToken::new(), Duration::from_secs(5));
        let result = lifecycle.run(async { Ok::<_, AppError>(42) }).await;
        assert_eq!(tokio_test::assert_ok!(result), 42);
    }

    #[tokio::test]
    async fn test_work_error_is_kept() {
        let lifecycle = RequestLifecycle::new(CancellationToken::new(), Duration::from_secs(5));
        let err = lifecycle
            .run(async { Err::<(), _>(AppError::bad_request("Error executing query")) })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancellation_yields_408() {
        let token = CancellationToken::new();
        let lifecycle = RequestLifecycle::new(token.clone(), Duration::from_secs(5));

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = lifecycle
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();

        canceller.await.unwrap();
        assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(err.to_api_error().error, "Request canceled");
    }

    #[tokio::test]
    async fn test_deadline_yields_504() {
        let lifecycle = RequestLifecycle::new(CancellationToken::new(), Duration::from_millis(20));
        let err = lifecycle
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.to_api_error().error, "Processing too slow");
    }

    #[tokio::test]
    async fn test_losing_work_is_aborted() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let lifecycle = RequestLifecycle::new(CancellationToken::new(), Duration::from_millis(10));

        let result = lifecycle
            .run(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, AppError>(())
            })
            .await;
        tokio_test::assert_err!(result);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();
        let lifecycle = RequestLifecycle::new(token, Duration::from_secs(5));

        let err = lifecycle
            .watch(std::future::pending::<Result<(), AppError>>())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RequestCanceled));
    }
}
