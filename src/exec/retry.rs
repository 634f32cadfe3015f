//! Bounded retry with fixed backoff for external tool invocations.
//!
//! A retry policy is a small value object consumed by a generic "retry this
//! operation" function, so the loop is testable independently of any
//! specific external command. Only non-zero exit codes are retried;
//! precondition failures detected before invocation never reach this layer.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::invoker::{ToolError, ToolOutput};

/// Retry policy: attempt cap plus a fixed delay between attempts.
///
/// Backoff is deliberately fixed, not exponential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least 1).
    pub max_attempts: u32,
    /// Fixed delay inserted between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Creates a new policy.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Final output of a retried operation, with the number of attempts used.
#[derive(Debug)]
pub struct Attempted {
    /// Output of the last attempt.
    pub output: ToolOutput,
    /// How many attempts were made (1-based).
    pub attempts: u32,
}

impl Attempted {
    /// Returns true if the last attempt exited with code 0.
    pub fn is_success(&self) -> bool {
        self.output.is_success()
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping `policy.backoff`
/// between attempts.
///
/// The operation is retried only while it completes with a non-zero exit
/// code. A spawn failure aborts immediately: if the command cannot be
/// started once, it cannot be started at all.
///
/// # Errors
///
/// Returns `ToolError` only when the operation itself fails to start.
/// Exhausting all attempts is reported through `Attempted`, carrying the
/// last captured stderr for diagnosis.
pub async fn run_with_retry<F, Fut>(policy: RetryPolicy, mut op: F) -> Result<Attempted, ToolError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ToolOutput, ToolError>>,
{
    let mut attempt = 1;
    loop {
        let output = op(attempt).await?;

        if output.is_success() || attempt >= policy.max_attempts {
            return Ok(Attempted { output, attempts: attempt });
        }

        warn!(
            attempt = attempt,
            max_attempts = policy.max_attempts,
            exit_code = output.exit_code,
            "Attempt failed, retrying after backoff"
        );
        tokio::time::sleep(policy.backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn output_with_code(code: i32) -> ToolOutput {
        ToolOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: format!("exit {}", code),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = run_with_retry(policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(output_with_code(0)) }
        })
        .await
        .unwrap();

        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_on_attempt_k_stops_retrying() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result = run_with_retry(policy, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Ok(output_with_code(1))
                } else {
                    Ok(output_with_code(0))
                }
            }
        })
        .await
        .unwrap();

        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        // No attempts beyond the successful one
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_carry_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = run_with_retry(policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(ToolOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("failure on attempt {}", attempt),
                })
            }
        })
        .await
        .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.output.stderr, "failure on attempt 3");
    }

    #[tokio::test]
    async fn test_spawn_failure_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = run_with_retry(policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ToolError::Spawn {
                    command: "missing".to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_clamps_zero_attempts() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}
