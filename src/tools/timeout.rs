//! Execution Timeout Management
//!
//! Wall-clock bound applied to every execution.

use crate::policy::SecurityPolicy;
use std::time::Duration;
use tokio::time;

/// Returned when a future outlives its timeout
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Command timed out after {} seconds", .0.as_secs_f64())]
pub struct ExecutionTimedOut(pub Duration);

/// Execution timeout configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionTimeout {
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::from_secs(crate::policy::DEFAULT_TIMEOUT_SECS)
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// ```
    /// use std::time::Duration;
    /// use commandgate::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration().as_secs(), 30);
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Timeout configured by a policy
    pub fn from_policy(policy: &SecurityPolicy) -> Self {
        Self::from_secs(policy.timeout_seconds.get())
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run a future, giving up once the timeout expires
    ///
    /// The future is dropped on expiry.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, ExecutionTimedOut>
    where
        F: std::future::Future,
    {
        time::timeout(self.duration, future)
            .await
            .map_err(|_| ExecutionTimedOut(self.duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU64;

    #[test]
    fn test_timeout_default() {
        let timeout = ExecutionTimeout::default();
        assert_eq!(timeout.duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_timeout_from_secs() {
        let timeout = ExecutionTimeout::from_secs(45);
        assert_eq!(timeout.duration(), Duration::from_secs(45));
    }

    #[test]
    fn test_timeout_from_policy() {
        let policy = SecurityPolicy {
            timeout_seconds: NonZeroU64::new(7).unwrap(),
            ..SecurityPolicy::default()
        };
        assert_eq!(
            ExecutionTimeout::from_policy(&policy).duration(),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_timed_out_message() {
        let err = ExecutionTimedOut(Duration::from_secs(1));
        assert_eq!(err.to_string(), "Command timed out after 1 seconds");
    }

    #[tokio::test]
    async fn test_timeout_run_success() {
        let timeout = ExecutionTimeout::from_secs(10);
        let result = timeout.run(async { "test value" }).await;
        assert_eq!(result, Ok("test value"));
    }

    #[tokio::test]
    async fn test_timeout_run_timeout() {
        let timeout = ExecutionTimeout::from_secs(1);

        let result = timeout
            .run(async {
                // Sleep longer than timeout
                tokio::time::sleep(Duration::from_secs(2)).await;
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_run_just_in_time() {
        let timeout = ExecutionTimeout::from_secs(1);

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
            })
            .await;

        assert!(result.is_ok());
    }
}
