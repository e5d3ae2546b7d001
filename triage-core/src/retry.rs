//! Bounded retry with exponential backoff for external calls
//!
//! Every call the pipeline makes to the version-control host, the store or
//! a model provider goes through [`RetryExecutor::execute`]. Call sites only
//! supply the operation and its error type's [`Classify`] implementation;
//! attempt bounds, per-attempt timeouts and backoff live here.
//!
//! Wrapped operations may run more than once, so they must be idempotent or
//! tolerate partial re-execution.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Whether a failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Network error, timeout, 5xx
    Transient,
    /// Validation error, 4xx
    Permanent,
}

impl ErrorClass {
    /// Class of an HTTP failure: 5xx, 408 and 429 are transient, the rest permanent
    pub fn from_status(status: u16) -> Self {
        if status >= 500 || status == 408 || status == 429 {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Errors that know whether they are retryable
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Backoff and attempt bounds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for a single delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f32,

    /// Randomize each delay by adding up to one extra delay on top
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and local tooling
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Backoff schedule between attempts; yields `max_attempts - 1` delays
    pub fn backoff(&self) -> ExponentialBuilder {
        let retries = self.max_attempts.max(1) - 1;
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier.max(1.0))
            .with_max_times(retries as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Kind of external call, used to pick the per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Version-control host API
    Host,
    /// External document store
    Store,
    /// Model invocation
    Model,
}

impl fmt::Display for CallClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallClass::Host => write!(f, "host"),
            CallClass::Store => write!(f, "store"),
            CallClass::Model => write!(f, "model"),
        }
    }
}

/// Per-attempt timeouts by call class
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CallTimeouts {
    #[serde(with = "humantime_serde")]
    pub host: Duration,
    #[serde(with = "humantime_serde")]
    pub store: Duration,
    #[serde(with = "humantime_serde")]
    pub model: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            host: Duration::from_secs(60),
            store: Duration::from_secs(60),
            model: Duration::from_secs(180),
        }
    }
}

impl CallTimeouts {
    pub fn for_class(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Host => self.host,
            CallClass::Store => self.store,
            CallClass::Model => self.model,
        }
    }
}

/// What went wrong on a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure<E> {
    /// The operation returned an error
    Failed(E),
    /// The operation did not finish within the per-attempt timeout
    TimedOut(Duration),
}

impl<E: Classify> AttemptFailure<E> {
    fn class(&self) -> ErrorClass {
        match self {
            AttemptFailure::Failed(e) => e.class(),
            AttemptFailure::TimedOut(_) => ErrorClass::Transient,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Failed(e) => write!(f, "{}", e),
            AttemptFailure::TimedOut(d) => write!(f, "timed out after {:?}", d),
        }
    }
}

/// Terminal failure of a retried call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError<E> {
    /// Label of the operation, for logs and reports
    pub operation: String,
    /// How many attempts were made
    pub attempts: u32,
    /// The last failure observed
    pub last: AttemptFailure<E>,
}

impl<E: Classify> RetryError<E> {
    /// True if the call was abandoned because the failure was permanent
    pub fn is_permanent(&self) -> bool {
        self.last.class() == ErrorClass::Permanent
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.operation, self.attempts, self.last
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Runs external calls under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    timeouts: CallTimeouts,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, timeouts: CallTimeouts) -> Self {
        Self { policy, timeouts }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation`, retrying transient failures
    ///
    /// Permanent failures return after exactly one attempt. Transient
    /// failures (including per-attempt timeouts) are retried until
    /// `max_attempts` is reached, sleeping with jittered exponential
    /// backoff in between.
    pub async fn execute<T, E, F, Fut>(
        &self,
        class: CallClass,
        operation: &str,
        mut op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let timeout = self.timeouts.for_class(class);
        let attempts = AtomicU32::new(0);

        let attempt = || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(operation, %class, attempt, max_attempts, "Calling external service");
            let call = op();
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(AttemptFailure::Failed(e)),
                    Err(_) => Err(AttemptFailure::TimedOut(timeout)),
                }
            }
        };

        let result = attempt
            .retry(self.policy.backoff())
            .sleep(tokio::time::sleep)
            .when(|failure: &AttemptFailure<E>| failure.class() == ErrorClass::Transient)
            .notify(|failure: &AttemptFailure<E>, delay: Duration| {
                warn!(
                    operation,
                    attempt = attempts.load(Ordering::SeqCst),
                    error = %failure,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off"
                );
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Call succeeded after retry");
                }
                Ok(value)
            }
            Err(failure) => {
                warn!(
                    operation,
                    attempts,
                    error = %failure,
                    class = ?failure.class(),
                    "Giving up on external call"
                );
                Err(RetryError {
                    operation: operation.to_string(),
                    attempts,
                    last: failure,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(ErrorClass);

    impl Classify for TestError {
        fn class(&self) -> ErrorClass {
            self.0
        }
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error ({:?})", self.0)
        }
    }

    fn executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::immediate(max_attempts), CallTimeouts::default())
    }

    #[tokio::test]
    async fn test_permanent_failure_attempted_once() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), _> = executor(3)
            .execute(CallClass::Host, "get_change", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError(ErrorClass::Permanent)) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), _> = executor(2)
            .execute(CallClass::Store, "increment", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError(ErrorClass::Transient)) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.attempts, 2);
        assert!(!err.is_permanent());
        assert_eq!(err.last, AttemptFailure::Failed(TestError(ErrorClass::Transient)));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = executor(3)
            .execute(CallClass::Model, "invoke", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TestError(ErrorClass::Transient))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let timeouts = CallTimeouts {
            host: Duration::from_millis(10),
            ..CallTimeouts::default()
        };
        let executor = RetryExecutor::new(RetryPolicy::immediate(2), timeouts);
        let calls = AtomicU32::new(0);

        let result: std::result::Result<(), RetryError<TestError>> = executor
            .execute(CallClass::Host, "slow", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err.last, AttemptFailure::TimedOut(_)));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
            multiplier: 2.0,
            jitter: false,
        };
        let delays: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff().build().count(), 0);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(10),
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delays: Vec<Duration> = policy.backoff().build().collect();
            assert_eq!(delays.len(), 1);
            assert!(delays[0] >= Duration::from_secs(10) && delays[0] <= Duration::from_secs(20));
        }
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(ErrorClass::from_status(500), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(408), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(429), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_status(404), ErrorClass::Permanent);
        assert_eq!(ErrorClass::from_status(400), ErrorClass::Permanent);
    }

    #[test]
    fn test_parse_policy_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
max_attempts = 4
initial_backoff = "500ms"
"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
    }
}
