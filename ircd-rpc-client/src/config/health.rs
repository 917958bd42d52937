//! Connection health thresholds.
//!
//! A [`Connection`](crate::Connection) counts consecutive failures and
//! remembers when it last failed and last succeeded. [`HealthPolicy`] decides
//! when those counters mark the connection as suspect:
//!
//! - `error_threshold` consecutive failures, or
//! - a failure newer than the last success that happened within
//!   `freshness_window`.
//!
//! # Example
//!
//! ```
//! use ircd_rpc_client::HealthPolicy;
//! use std::time::Duration;
//!
//! let policy = HealthPolicy::new()
//!     .error_threshold(3)
//!     .freshness_window(Duration::from_secs(10));
//! assert!(policy.validate().is_ok());
//! ```

use std::time::Duration;

/// Default health thresholds.
pub mod defaults {
    use std::time::Duration;

    /// Consecutive failures after which a connection is replaced.
    pub const ERROR_THRESHOLD: u32 = 2;

    /// How long an unredeemed failure keeps a connection suspect.
    pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(30);
}

/// Thresholds that decide when a connection should be proactively replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failures that trigger a reconnect. Must be at least 1.
    pub error_threshold: u32,

    /// Age below which an unredeemed failure still marks the connection suspect.
    pub freshness_window: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            error_threshold: defaults::ERROR_THRESHOLD,
            freshness_window: defaults::FRESHNESS_WINDOW,
        }
    }
}

impl HealthPolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consecutive-failure threshold.
    ///
    /// # Panics
    ///
    /// Panics if `threshold` is 0.
    pub fn error_threshold(mut self, threshold: u32) -> Self {
        assert!(threshold >= 1, "error_threshold must be >= 1");
        self.error_threshold = threshold;
        self
    }

    /// Set the freshness window.
    pub fn freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Validate the policy configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.error_threshold == 0 {
            return Err("error_threshold must be >= 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_policy_default() {
        let policy = HealthPolicy::default();
        assert_eq!(policy.error_threshold, 2);
        assert_eq!(policy.freshness_window, Duration::from_secs(30));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_health_policy_builder() {
        let policy = HealthPolicy::new()
            .error_threshold(5)
            .freshness_window(Duration::from_millis(250));
        assert_eq!(policy.error_threshold, 5);
        assert_eq!(policy.freshness_window, Duration::from_millis(250));
    }

    #[test]
    fn test_health_policy_validate() {
        let invalid = HealthPolicy {
            error_threshold: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    #[should_panic(expected = "error_threshold must be >= 1")]
    fn test_health_policy_zero_threshold() {
        HealthPolicy::new().error_threshold(0);
    }
}
