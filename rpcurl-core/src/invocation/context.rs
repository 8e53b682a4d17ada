//! Deadline scoping for one invocation.
use std::{future::Future, time::Duration};
use tokio::time::Instant;

/// The operation did not finish before the deadline of its [`InvocationContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// Carries the deadline every network operation of an invocation runs under.
///
/// Contexts nest: [`with_timeout`](Self::with_timeout) derives a narrower scope that expires at
/// the earlier of its own timeout and the parent deadline. Expiry only cancels the futures run
/// inside that scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvocationContext {
    deadline: Option<Instant>,
}

impl InvocationContext {
    /// Starts a context that expires after `max_time`, or never when `None`.
    pub fn new(max_time: Option<Duration>) -> Self {
        Self {
            deadline: max_time.map(|max_time| Instant::now() + max_time),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Derives a child scope bounded by `timeout` and by this context's deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(deadline) => deadline.min(candidate),
            None => candidate,
        };

        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::ZERO)
    }

    /// True when at most `slack` is left before the deadline.
    pub fn expires_within(&self, slack: Duration) -> bool {
        self.remaining().is_some_and(|left| left <= slack)
    }

    /// Drives `fut` to completion unless the deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| DeadlineExceeded),
            None => Ok(fut.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_child_scope_never_outlives_parent() {
        let parent = InvocationContext::new(Some(Duration::from_secs(2)));
        let child = parent.with_timeout(Duration::from_secs(10));

        assert_eq!(child.deadline(), parent.deadline());

        let narrower = parent.with_timeout(Duration::from_secs(1));
        assert!(narrower.deadline() < parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_parent_takes_child_timeout() {
        let child = InvocationContext::unbounded().with_timeout(Duration::from_secs(1));

        assert_eq!(child.remaining(), Some(Duration::from_secs(1)));
        assert_eq!(InvocationContext::unbounded().remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_expires() {
        let ctx = InvocationContext::new(Some(Duration::from_millis(100)));

        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;

        assert_eq!(result, Err(DeadlineExceeded));
        assert!(ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_within_deadline() {
        let ctx = InvocationContext::new(Some(Duration::from_secs(1)));

        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
        assert_eq!(InvocationContext::unbounded().run(async { 8 }).await, Ok(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_within_slack() {
        let ctx = InvocationContext::new(Some(Duration::from_millis(100)));

        assert!(!ctx.expires_within(Duration::from_millis(5)));
        tokio::time::advance(Duration::from_millis(96)).await;
        assert!(ctx.expires_within(Duration::from_millis(5)));
        assert!(!ctx.is_expired());
        assert!(!InvocationContext::unbounded().expires_within(Duration::MAX));
    }
}
