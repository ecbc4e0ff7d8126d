//! Cancellation and deadlines threaded through every delegation hop

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Execution context for one task submission.
///
/// Children share the parent's deadline and are cancelled with it, but
/// cancelling a child leaves the parent running.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Use an externally owned token, e.g. the server's shutdown token
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the context is already cancelled or past its deadline
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it finishes, the context is cancelled or the
    /// deadline passes, whichever comes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => Err(Error::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(Error::DeadlineExceeded),
                out = fut => out,
            },
            None => tokio::select! {
                _ = self.token.cancelled() => Err(Error::Cancelled),
                out = fut => out,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = TaskContext::new();
        let out = ctx.run(async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children_only() {
        let parent = TaskContext::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(parent.check().is_ok());

        let other = parent.child();
        parent.cancel();
        assert!(matches!(other.check(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_future() {
        let ctx = TaskContext::new();
        let child = ctx.child();

        let handle = tokio::spawn(async move {
            child
                .run(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, Error>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = TaskContext::with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(())
            })
            .await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }
}
