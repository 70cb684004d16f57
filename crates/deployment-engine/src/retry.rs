//! Retry/failsafe execution of provider operations.
//!
//! Provider APIs fail transiently; every provider call the engine makes is
//! wrapped here with bounded retries and a fixed cool-down between attempts.
//! Retry counts and cool-downs come from instance or plugin properties so
//! each provider can tune its own tolerance for transient API errors.

use crate::{CancelToken, Error};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Property key for the maximum number of attempts
pub const RETRY_ATTEMPTS_PROPERTY: &str = "operation_retry";
/// Property key for the cool-down between attempts, in seconds
pub const RETRY_COOL_DOWN_PROPERTY: &str = "wait_between_operation_retry";

/// Bounded-retry policy with a fixed cool-down
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Fixed sleep between attempts
    pub cool_down: Duration,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            cool_down: Duration::ZERO,
        }
    }

    /// Read a policy from instance or plugin properties, falling back to the
    /// given defaults for any key that is absent or malformed.
    pub fn from_properties(properties: &Map<String, Value>, defaults: RetryPolicy) -> Self {
        let max_attempts = read_u64(properties.get(RETRY_ATTEMPTS_PROPERTY))
            .map(|v| v.max(1) as u32)
            .unwrap_or(defaults.max_attempts);
        let cool_down = read_u64(properties.get(RETRY_COOL_DOWN_PROPERTY))
            .map(Duration::from_secs)
            .unwrap_or(defaults.cool_down);
        Self {
            max_attempts,
            cool_down,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            cool_down: Duration::from_secs(10),
        }
    }
}

fn read_u64(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Which failures are eligible for another attempt.
///
/// `AnyFailure` mirrors the "empty retryable set" convention: everything is
/// retried except interruption, which is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEligibility {
    /// Retry only errors flagged transient
    TransientOnly,
    /// Retry any failure except interruption
    AnyFailure,
}

impl RetryEligibility {
    fn allows(&self, error: &Error) -> bool {
        match self {
            RetryEligibility::TransientOnly => error.is_transient(),
            RetryEligibility::AnyFailure => true,
        }
    }
}

/// Run an action with bounded retries and a fixed cool-down.
///
/// Interruption aborts immediately, both between attempts and during a
/// cool-down sleep, and always surfaces as [`Error::Interrupted`].
pub async fn retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    eligibility: RetryEligibility,
    cancel: &CancelToken,
    mut action: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        match action().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_interrupted() => return Err(error),
            Err(error) => {
                if !eligibility.allows(&error) || attempt >= max_attempts {
                    return Err(error);
                }
                warn!(
                    action = label,
                    attempt,
                    max_attempts,
                    cool_down_secs = policy.cool_down.as_secs_f64(),
                    error = %error,
                    "operation failed, retrying after cool-down"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Interrupted),
                    _ = tokio::time::sleep(policy.cool_down) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn policy(max_attempts: u32, cool_down_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            cool_down: Duration::from_millis(cool_down_ms),
        }
    }

    #[tokio::test]
    async fn retryable_action_runs_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancelToken::new();
        let started = Instant::now();

        let result: Result<(), Error> = retry(
            "always-fails",
            policy(3, 20),
            RetryEligibility::TransientOnly,
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::transient("server_1", "create", "api timeout"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // two cool-downs between three attempts
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn non_retryable_error_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancelToken::new();

        let result: Result<(), Error> = retry(
            "bad-usage",
            policy(5, 10),
            RetryEligibility::TransientOnly,
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::provider_failure("server_1", "create", "quota exceeded"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn any_failure_eligibility_retries_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancelToken::new();

        let _: Result<(), Error> = retry(
            "any",
            policy(2, 1),
            RetryEligibility::AnyFailure,
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::provider_failure("server_1", "create", "boom"))
                }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn eventual_success_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancelToken::new();

        let result = retry(
            "flaky",
            policy(5, 1),
            RetryEligibility::TransientOnly,
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::transient("server_1", "create", "flake"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn interruption_aborts_cool_down() {
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let started = Instant::now();
        let result: Result<(), Error> = retry(
            "interrupted",
            policy(2, 10_000),
            RetryEligibility::TransientOnly,
            &cancel,
            || async { Err(Error::transient("server_1", "create", "flake")) },
        )
        .await;

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn interruption_error_is_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancelToken::new();

        let result: Result<(), Error> = retry(
            "interrupted-inside",
            policy(5, 1),
            RetryEligibility::AnyFailure,
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Interrupted)
                }
            },
        )
        .await;

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_from_properties() {
        let mut properties = Map::new();
        properties.insert(RETRY_ATTEMPTS_PROPERTY.to_string(), json!(4));
        properties.insert(RETRY_COOL_DOWN_PROPERTY.to_string(), json!("7"));

        let policy = RetryPolicy::from_properties(&properties, RetryPolicy::default());
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.cool_down, Duration::from_secs(7));

        let defaults = RetryPolicy::default();
        assert_eq!(RetryPolicy::from_properties(&Map::new(), defaults), defaults);
    }
}
