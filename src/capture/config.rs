//! Capture configuration

use crate::page::Settle;
use std::time::Duration;

/// Retry policy for throttled captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3)
    pub max_retries: u32,
    /// Fixed delay between attempts (default: 500ms)
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Configuration for a capture driver
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How to wait for layout after scrolling (default: fixed 100ms)
    pub settle: Settle,
    /// Retry policy for throttled captures
    pub retry: RetryPolicy,
    /// Lifetime bound of in-page positioning mutations (default: 5000ms)
    pub auto_revert: Duration,
    /// Wait for the page to finish loading before capturing (default: true)
    pub wait_for_load: bool,
    /// Upper bound on the load wait (default: 10000ms)
    pub load_timeout: Duration,
    /// Hide `nav` and `header` elements for the whole capture (default: false)
    pub hide_navigation: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settle: Settle::default(),
            retry: RetryPolicy::default(),
            auto_revert: Duration::from_millis(5000),
            wait_for_load: true,
            load_timeout: Duration::from_millis(10_000),
            hide_navigation: false,
        }
    }
}

impl CaptureConfig {
    /// Create a new config builder
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder::default()
    }
}

/// Builder for CaptureConfig
#[derive(Default)]
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    /// Set the settle strategy
    pub fn settle(mut self, settle: Settle) -> Self {
        self.config.settle = settle;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.config.retry = RetryPolicy {
            max_retries,
            backoff,
        };
        self
    }

    /// Set the auto-revert bound; zero disables it
    pub fn auto_revert(mut self, after: Duration) -> Self {
        self.config.auto_revert = after;
        self
    }

    /// Enable/disable the page load wait
    pub fn wait_for_load(mut self, wait: bool) -> Self {
        self.config.wait_for_load = wait;
        self
    }

    /// Set the page load timeout
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.config.load_timeout = timeout;
        self
    }

    /// Enable/disable navigation hiding
    pub fn hide_navigation(mut self, hide: bool) -> Self {
        self.config.hide_navigation = hide;
        self
    }

    /// Build the config
    pub fn build(self) -> CaptureConfig {
        self.config
    }
}
