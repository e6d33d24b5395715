//! Retry policy of the reqwest transport.
//!
//! The core never retries on its own: the default strategy is [`RetryStrategy::None`].
//! Retrying is a transport concern and is configured on the
//! [`ClientBuilder`](crate::ClientBuilder).

use crate::error::TransportError;
use rand::Rng;
use std::time::Duration;

/// How long to wait before each retry, and when to give up.
///
/// ```
/// use declaro::RetryStrategy;
/// use std::time::Duration;
///
/// let backoff = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(50),
///     max_delay: Duration::from_secs(2),
///     max_retries: 4,
///     jitter: false,
/// };
/// assert_eq!(backoff.delay_for_attempt(3), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.delay_for_attempt(5), None);
/// ```
#[derive(Debug, Clone, Default)]
pub enum RetryStrategy {
    /// Never retry.
    #[default]
    None,

    /// Wait `initial_delay * 2^(attempt - 1)`, capped at `max_delay`.
    ExponentialBackoff {
        initial_delay: Duration,
        max_delay: Duration,
        max_retries: usize,
        /// Scale each delay by a random factor in `[0.5, 1.0]`.
        jitter: bool,
    },

    /// Wait the same delay before every retry.
    Linear { delay: Duration, max_retries: usize },

    /// `delay_fn(attempt)` returns the delay before the retry, or `None` to stop.
    Custom {
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl RetryStrategy {
    /// The delay before retry number `attempt` (1-indexed), or `None` once retries are
    /// exhausted.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                jitter,
            } => {
                if attempt > *max_retries {
                    return None;
                }

                let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                let multiplier = 2u32.saturating_pow(exponent);
                let delay = initial_delay.saturating_mul(multiplier).min(*max_delay);

                if *jitter {
                    Some(delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0)))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Linear { delay, max_retries } => {
                (attempt <= *max_retries).then_some(*delay)
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }
}

/// Decides whether a failed attempt should be sent again.
///
/// ```
/// use declaro::{RetryPredicate, TransportError};
///
/// struct OnlyTimeouts;
///
/// impl RetryPredicate for OnlyTimeouts {
///     fn should_retry(&self, error: &TransportError, _attempt: usize) -> bool {
///         matches!(error, TransportError::Timeout)
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    fn should_retry(&self, error: &TransportError, attempt: usize) -> bool;
}

/// Retries whatever [`TransportError::is_retryable`] accepts. The default predicate.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &TransportError, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retries 5xx responses only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl RetryPredicate for RetryOn5xx {
    fn should_retry(&self, error: &TransportError, _attempt: usize) -> bool {
        matches!(error, TransportError::HttpError { status, .. } if status.is_server_error())
    }
}

/// Retries timeouts only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, error: &TransportError, _attempt: usize) -> bool {
        matches!(error, TransportError::Timeout)
    }
}

/// Retries when any of its predicates would.
pub struct AnyOf(pub Vec<Box<dyn RetryPredicate>>);

impl RetryPredicate for AnyOf {
    fn should_retry(&self, error: &TransportError, attempt: usize) -> bool {
        self.0.iter().any(|p| p.should_retry(error, attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};

    fn http_error(status: StatusCode) -> TransportError {
        TransportError::HttpError {
            status,
            raw_response: String::new(),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_retries: 4,
            jitter: false,
        };

        let delays: Vec<_> = (1..=5).map(|a| strategy.delay_for_attempt(a)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(200)),
                Some(Duration::from_millis(400)),
                Some(Duration::from_millis(500)),
                None,
            ]
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_retries: 1,
            jitter: true,
        };

        let delay = strategy.delay_for_attempt(1).unwrap();
        assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(100));
    }

    #[test]
    fn test_linear_and_none() {
        let linear = RetryStrategy::Linear {
            delay: Duration::from_millis(10),
            max_retries: 2,
        };
        assert_eq!(linear.delay_for_attempt(2), Some(Duration::from_millis(10)));
        assert_eq!(linear.delay_for_attempt(3), None);
        assert_eq!(RetryStrategy::None.delay_for_attempt(1), None);
    }

    #[test]
    fn test_predicates() {
        let any = AnyOf(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);

        assert!(any.should_retry(&http_error(StatusCode::BAD_GATEWAY), 1));
        assert!(any.should_retry(&TransportError::Timeout, 1));
        assert!(!any.should_retry(&http_error(StatusCode::TOO_MANY_REQUESTS), 1));
        assert!(RetryOnRetryable.should_retry(&http_error(StatusCode::TOO_MANY_REQUESTS), 1));
        assert!(!RetryOnRetryable.should_retry(&http_error(StatusCode::NOT_FOUND), 1));
    }
}
