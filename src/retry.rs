// Retry engine: capped exponential backoff around outbound requests.
//
// Only transport-level failures are retried. Responses that arrive, even
// error responses, go back to the caller untouched. Retries are unbounded
// unless the policy sets a cap.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::api::RequestError;
use crate::cancel::CancellationToken;
use crate::error::{Result, UploadError};

/// Longest wait between two attempts, in seconds.
pub const MAX_DELAY_SECS: u64 = 60;

/// Limits on how long a request keeps being retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_delay: Duration,
    /// Total attempts including the first. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Wall-clock budget across all attempts. `None` retries forever.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(MAX_DELAY_SECS),
            max_attempts: None,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// `min(2^attempt, max_delay)` seconds, `attempt` counting from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_delay)
    }
}

/// Emitted before every wait.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    pub attempt: u32,
    pub delay: Duration,
    pub error: String,
}

/// Blocks the current thread between attempts.
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, sleeper: Box<dyn Sleeper>) -> Self {
        Retrier { policy, sleeper }
    }

    /// Runs `op` until it returns something other than a transient error.
    pub fn run<T>(
        &self,
        cancel: &CancellationToken,
        notify: &mut dyn FnMut(&RetryNotice),
        mut op: impl FnMut() -> std::result::Result<T, RequestError>,
    ) -> Result<T> {
        let started = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            if cancel.is_forced() {
                return Err(UploadError::Cancelled);
            }

            let error = match op() {
                Ok(value) => return Ok(value),
                Err(RequestError::Fatal(msg)) => return Err(UploadError::Request(msg)),
                Err(RequestError::Transient(msg)) => msg,
            };

            let out_of_attempts = self.policy.max_attempts.is_some_and(|max| attempt >= max);
            let out_of_time = self
                .policy
                .max_elapsed
                .is_some_and(|max| started.elapsed() >= max);
            if out_of_attempts || out_of_time {
                return Err(UploadError::RetriesExhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.delay(attempt);
            warn!(attempt, delay_secs = delay.as_secs(), "request failed, retrying: {error}");
            notify(&RetryNotice {
                attempt,
                delay,
                error,
            });
            self.sleeper.sleep(delay);
            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records requested delays instead of sleeping.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSleeper {
        pub(crate) delays: Rc<RefCell<Vec<Duration>>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, delay: Duration) {
            self.delays.borrow_mut().push(delay);
        }
    }

    fn secs(v: &[u64]) -> Vec<Duration> {
        v.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=8).map(|a| policy.delay(a)).collect();
        assert_eq!(delays, secs(&[2, 4, 8, 16, 32, 60, 60, 60]));
        assert_eq!(policy.delay(200), Duration::from_secs(60));
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let sleeper = RecordingSleeper::default();
        let retrier = Retrier::new(RetryPolicy::default(), Box::new(sleeper.clone()));
        let mut calls = 0;
        let mut notices = Vec::new();

        let value = retrier
            .run(&CancellationToken::new(), &mut |n| notices.push(n.clone()), || {
                calls += 1;
                if calls < 4 {
                    Err(RequestError::Transient("connection reset".into()))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();

        assert_eq!(value, 4);
        assert_eq!(*sleeper.delays.borrow(), secs(&[2, 4, 8]));
        let attempts: Vec<_> = notices.iter().map(|n| n.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(notices[0].error, "connection reset");
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let sleeper = RecordingSleeper::default();
        let retrier = Retrier::new(RetryPolicy::default(), Box::new(sleeper.clone()));
        let result: Result<()> = retrier.run(&CancellationToken::new(), &mut |_| {}, || {
            Err(RequestError::Fatal("relative URL without a base".into()))
        });
        assert!(matches!(result, Err(UploadError::Request(_))));
        assert!(sleeper.delays.borrow().is_empty());
    }

    #[test]
    fn attempt_cap_gives_up() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        let retrier = Retrier::new(policy, Box::new(sleeper.clone()));
        let result: Result<()> = retrier.run(&CancellationToken::new(), &mut |_| {}, || {
            Err(RequestError::Transient("timed out".into()))
        });
        match result {
            Err(UploadError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "timed out");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(*sleeper.delays.borrow(), secs(&[2, 4]));
    }

    #[test]
    fn zero_elapsed_budget_gives_up_after_first_failure() {
        let policy = RetryPolicy {
            max_elapsed: Some(Duration::ZERO),
            ..RetryPolicy::default()
        };
        let retrier = Retrier::new(policy, Box::new(RecordingSleeper::default()));
        let result: Result<()> = retrier.run(&CancellationToken::new(), &mut |_| {}, || {
            Err(RequestError::Transient("refused".into()))
        });
        assert!(matches!(
            result,
            Err(UploadError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[test]
    fn forced_cancel_stops_retrying() {
        let cancel = CancellationToken::new();
        let retrier = Retrier::new(RetryPolicy::default(), Box::new(RecordingSleeper::default()));
        let mut calls = 0;
        let result: Result<()> = retrier.run(&cancel, &mut |_| {}, || {
            calls += 1;
            cancel.force();
            Err(RequestError::Transient("reset".into()))
        });
        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn graceful_cancel_does_not_interrupt_a_request() {
        let cancel = CancellationToken::new();
        cancel.request();
        let retrier = Retrier::new(RetryPolicy::default(), Box::new(RecordingSleeper::default()));
        let mut calls = 0;
        let value = retrier
            .run(&cancel, &mut |_| {}, || {
                calls += 1;
                if calls == 1 {
                    Err(RequestError::Transient("reset".into()))
                } else {
                    Ok("done")
                }
            })
            .unwrap();
        assert_eq!(value, "done");
    }
}
