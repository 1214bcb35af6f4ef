//! Bounded retry-with-timeout for flaky operations.
//!
//! Every attempt runs under its own timeout. A timed-out attempt counts as a
//! failed attempt. Once attempts are exhausted the last error is returned,
//! annotated with how many attempts were made.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_SECS};
use crate::error::ConfigError;

/// Environment override for the number of attempts.
pub const RETRY_COUNT_ENV: &str = "KILN_RETRY_COUNT";
/// Environment override for the per-attempt timeout, in seconds.
pub const TIMEOUT_ENV: &str = "KILN_TIMEOUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: DEFAULT_RETRY_COUNT,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
    }
  }
}

impl RetryPolicy {
  pub fn new(attempts: u32, timeout: Duration) -> Self {
    Self {
      attempts: attempts.max(1),
      timeout,
    }
  }

  /// Resolve the policy: environment first, then the project's values, then
  /// the defaults.
  pub fn resolve(project_attempts: Option<u32>, project_timeout: Option<u64>) -> Result<Self, ConfigError> {
    let attempts = match read_env::<u32>(RETRY_COUNT_ENV)? {
      Some(n) => n,
      None => project_attempts.unwrap_or(DEFAULT_RETRY_COUNT),
    };
    let timeout = match read_env::<u64>(TIMEOUT_ENV)? {
      Some(secs) => secs,
      None => project_timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
    };
    Ok(Self::new(attempts, Duration::from_secs(timeout)))
  }
}

fn read_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
  match std::env::var(var) {
    Ok(value) if value.trim().is_empty() => Ok(None),
    Ok(value) => value
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value,
      }),
    Err(_) => Ok(None),
  }
}

/// The final failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
  #[error("{operation} failed after {attempts} attempt(s): {source}")]
  Exhausted {
    operation: String,
    attempts: u32,
    #[source]
    source: E,
  },

  #[error("{operation} timed out after {attempts} attempt(s) ({timeout:?} per attempt)")]
  TimedOut {
    operation: String,
    attempts: u32,
    timeout: Duration,
  },
}

impl<E: std::error::Error + 'static> RetryError<E> {
  /// The error returned by the last attempt, when it did not time out.
  pub fn last_error(&self) -> Option<&E> {
    match self {
      RetryError::Exhausted { source, .. } => Some(source),
      RetryError::TimedOut { .. } => None,
    }
  }

  pub fn attempts(&self) -> u32 {
    match self {
      RetryError::Exhausted { attempts, .. } | RetryError::TimedOut { attempts, .. } => *attempts,
    }
  }
}

enum Failure<E> {
  Error(E),
  Timeout,
}

/// Run `op` up to `policy.attempts` times, each bounded by `policy.timeout`.
pub async fn retry_with_timeout<T, E, F, Fut>(
  policy: &RetryPolicy,
  operation: &str,
  mut op: F,
) -> Result<T, RetryError<E>>
where
  E: std::error::Error + 'static,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let attempts = policy.attempts.max(1);
  let mut last = Failure::Timeout;

  for attempt in 1..=attempts {
    debug!(operation, attempt, attempts, "starting attempt");
    match tokio::time::timeout(policy.timeout, op()).await {
      Ok(Ok(value)) => return Ok(value),
      Ok(Err(err)) => {
        warn!(operation, attempt, attempts, error = %err, "attempt failed");
        last = Failure::Error(err);
      }
      Err(_) => {
        warn!(operation, attempt, attempts, timeout = ?policy.timeout, "attempt timed out");
        last = Failure::Timeout;
      }
    }
  }

  Err(match last {
    Failure::Error(source) => RetryError::Exhausted {
      operation: operation.to_string(),
      attempts,
      source,
    },
    Failure::Timeout => RetryError::TimedOut {
      operation: operation.to_string(),
      attempts,
      timeout: policy.timeout,
    },
  })
}
