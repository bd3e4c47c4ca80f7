//! Traffic policies for request handling

use hyper::StatusCode;
use std::time::Duration;

/// Timeout policy for upstream attempts
#[derive(Clone, Debug, PartialEq)]
pub struct TimeoutPolicy {
    /// Bound on one forward attempt, response body included
    pub attempt_timeout: Duration,
    /// Bound on establishing the TCP connection
    pub connect_timeout: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

/// Retry policy for failed attempts.
///
/// A failed attempt is retried at most once, on a different instance.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Whether the single failover attempt is made at all
    pub retry_on_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_on_failure: true,
        }
    }
}

impl RetryPolicy {
    /// Responses that count as a failed attempt
    pub fn is_failure(&self, status: StatusCode) -> bool {
        status.is_server_error()
    }

    /// Upper bound on attempts per request
    pub fn max_attempts(&self) -> u32 {
        if self.retry_on_failure {
            2
        } else {
            1
        }
    }
}

/// Complete traffic policy configuration
#[derive(Clone, Debug, PartialEq)]
pub struct TrafficPolicy {
    pub timeout: TimeoutPolicy,
    pub retry: RetryPolicy,
    /// Route to Suspect instances when a service has no Healthy one
    pub degraded_fallback: bool,
}

impl Default for TrafficPolicy {
    fn default() -> Self {
        Self {
            timeout: TimeoutPolicy::default(),
            retry: RetryPolicy::default(),
            degraded_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_failures() {
        let policy = RetryPolicy::default();
        assert!(policy.is_failure(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(policy.is_failure(StatusCode::BAD_GATEWAY));
        assert!(policy.is_failure(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!policy.is_failure(StatusCode::OK));
        assert!(!policy.is_failure(StatusCode::NOT_FOUND));
        assert!(!policy.is_failure(StatusCode::CONFLICT));
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts(), 2);
        let no_retry = RetryPolicy {
            retry_on_failure: false,
        };
        assert_eq!(no_retry.max_attempts(), 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = TrafficPolicy::default();
        assert_eq!(policy.timeout.attempt_timeout, Duration::from_secs(3));
        assert!(policy.degraded_fallback);
    }
}
