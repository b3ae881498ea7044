//! Bounded retry for calls that cross the builder and store boundaries.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// How the wait between attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backoff {
  /// Always wait `interval`.
  Fixed,
  /// Double the wait after every attempt, never exceeding `max`.
  Exponential { max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Give up once this much time has passed since the first attempt.
  pub timeout: Duration,
  pub interval: Duration,
  pub backoff: Backoff,
}

impl RetryPolicy {
  pub fn fixed(timeout: Duration, interval: Duration) -> Self {
    Self {
      timeout,
      interval,
      backoff: Backoff::Fixed,
    }
  }

  /// A policy that makes exactly one attempt.
  pub fn once() -> Self {
    Self::fixed(Duration::ZERO, Duration::ZERO)
  }

  fn next_interval(&self, current: Duration) -> Duration {
    match self.backoff {
      Backoff::Fixed => self.interval,
      Backoff::Exponential { max } => current.saturating_mul(2).min(max),
    }
  }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
  /// The operation failed with an error the predicate did not consider retryable.
  #[error("{0}")]
  Fatal(E),

  /// Every attempt failed with a retryable error until the timeout elapsed.
  #[error("gave up after {attempts} attempt(s): {last}")]
  Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
  pub fn into_inner(self) -> E {
    match self {
      RetryError::Fatal(e) => e,
      RetryError::Exhausted { last, .. } => last,
    }
  }
}

/// Run `op` until it succeeds, fails fatally, or `policy.timeout` elapses.
///
/// `is_retryable` decides which errors are worth another attempt. The first
/// attempt always runs, even with a zero timeout.
pub fn retry<T, E, F, P>(policy: &RetryPolicy, mut op: F, is_retryable: P) -> Result<T, RetryError<E>>
where
  F: FnMut() -> Result<T, E>,
  P: Fn(&E) -> bool,
  E: std::fmt::Display,
{
  let started = Instant::now();
  let mut attempts: u32 = 0;
  let mut wait = policy.interval;

  loop {
    attempts = attempts.saturating_add(1);
    match op() {
      Ok(value) => {
        if attempts > 1 {
          debug!(attempts, "operation succeeded after retry");
        }
        return Ok(value);
      }
      Err(e) if !is_retryable(&e) => return Err(RetryError::Fatal(e)),
      Err(e) => {
        if started.elapsed().saturating_add(wait) > policy.timeout {
          warn!(attempts, error = %e, "retry budget exhausted");
          return Err(RetryError::Exhausted { attempts, last: e });
        }
        debug!(attempts, error = %e, wait_ms = wait.as_millis() as u64, "retrying");
        thread::sleep(wait);
        wait = policy.next_interval(wait);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, PartialEq)]
  enum TestError {
    Flaky,
    Broken,
  }

  impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "{:?}", self)
    }
  }

  fn quick() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(200), Duration::from_millis(1))
  }

  #[test]
  fn succeeds_after_transient_failures() {
    let mut calls = 0;
    let result = retry(
      &quick(),
      || {
        calls += 1;
        if calls < 3 { Err(TestError::Flaky) } else { Ok(calls) }
      },
      |e| *e == TestError::Flaky,
    );
    assert_eq!(result.unwrap(), 3);
  }

  #[test]
  fn fatal_errors_are_not_retried() {
    let mut calls = 0;
    let result: Result<(), _> = retry(
      &quick(),
      || {
        calls += 1;
        Err(TestError::Broken)
      },
      |e| *e == TestError::Flaky,
    );
    assert!(matches!(result, Err(RetryError::Fatal(TestError::Broken))));
    assert_eq!(calls, 1);
  }

  #[test]
  fn once_policy_makes_single_attempt() {
    let mut calls = 0;
    let result: Result<(), _> = retry(
      &RetryPolicy::once(),
      || {
        calls += 1;
        Err(TestError::Flaky)
      },
      |_| true,
    );
    assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    assert_eq!(calls, 1);
  }

  #[test]
  fn exponential_backoff_is_capped() {
    let policy = RetryPolicy {
      timeout: Duration::from_secs(1),
      interval: Duration::from_millis(10),
      backoff: Backoff::Exponential {
        max: Duration::from_millis(15),
      },
    };
    assert_eq!(policy.next_interval(Duration::from_millis(10)), Duration::from_millis(15));
  }
}
