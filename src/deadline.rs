//! Per-call deadlines carried through service calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ServiceError, ServiceResult};

/// Optional point in time after which a call should give up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Time left, `Some(ZERO)` once passed, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// Run `fut` bounded by the deadline, mapping expiry to `DeadlineExceeded`.
    pub async fn run<T, F>(&self, what: &str, fut: F) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>>,
    {
        if self.is_expired() {
            return Err(ServiceError::DeadlineExceeded(what.to_string()));
        }
        match self.remaining() {
            None => fut.await,
            Some(left) => tokio::time::timeout(left, fut)
                .await
                .map_err(|_| ServiceError::DeadlineExceeded(what.to_string()))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_deadline_runs_to_completion() {
        let value = Deadline::none().run("noop", async { Ok(7) }).await;
        assert_eq!(value, Ok(7));
        assert!(Deadline::none().remaining().is_none());
    }

    #[tokio::test]
    async fn test_expired_deadline_maps_to_deadline_exceeded() {
        let deadline = Deadline::after(Duration::from_millis(5));
        let result: ServiceResult<()> = deadline
            .run("slow call", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn test_passed_deadline_skips_the_call() {
        let deadline = Deadline::after(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(deadline.is_expired());
        let result: ServiceResult<u32> = deadline.run("never", async { Ok(1) }).await;
        assert!(matches!(result, Err(ServiceError::DeadlineExceeded(_))));
    }
}
