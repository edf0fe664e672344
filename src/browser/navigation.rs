//! Page navigation functionality
//!
//! This module handles URL navigation with retry logic and timeout handling,
//! URL policy checks, and the capture-rate throttle.

use crate::browser::PageHandle;
use crate::error::{Error, NavigationError, Result};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Options for page navigation
#[derive(Debug, Clone)]
pub struct NavigationOptions {
    /// Timeout in milliseconds (default: 30000)
    pub timeout_ms: u64,
    /// Wait until condition (default: load)
    pub wait_until: WaitUntil,
    /// Number of retry attempts (default: 2)
    pub retries: u32,
    /// Delay between retries in ms (default: 1000)
    pub retry_delay_ms: u64,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            wait_until: WaitUntil::Load,
            retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

/// Condition to wait for after navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// Wait until load event fires
    Load,
    /// Wait until DOMContentLoaded event fires
    DomContentLoaded,
    /// Wait for the load event plus a quiet period for late layout
    Settled,
}

/// Result of a navigation operation
#[derive(Debug)]
pub struct NavigationResult {
    /// Final URL after any redirects
    pub final_url: String,
    /// Page title
    pub title: Option<String>,
    /// Navigation duration in milliseconds
    pub duration_ms: u64,
}

/// Browser-internal schemes that never allow capture
const RESTRICTED_SCHEMES: &[&str] = &["chrome://", "chrome-extension://", "devtools://", "edge://"];

/// Store pages that never allow capture
const RESTRICTED_HOSTS: &[&str] = &[
    "chrome.google.com/webstore",
    "chrome.google.com/extensions",
    "chromewebstore.google.com",
];

/// URL validation utilities
pub struct UrlValidator;

impl UrlValidator {
    /// Validate a URL for navigation
    pub fn validate(url: &str) -> std::result::Result<(), String> {
        if url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }

        if !url.starts_with("http://")
            && !url.starts_with("https://")
            && !url.starts_with("file://")
        {
            return Err(format!(
                "URL must start with http://, https://, or file://: {}",
                url
            ));
        }

        if url.len() > 2048 {
            return Err("URL exceeds maximum length of 2048 characters".to_string());
        }

        Ok(())
    }

    /// Whether the browser forbids capturing a page at `url`
    pub fn is_restricted(url: &str) -> bool {
        let lower = url.trim().to_ascii_lowercase();

        if RESTRICTED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            return true;
        }
        if lower.starts_with("about:") {
            return lower != "about:blank";
        }

        let without_scheme = lower
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&lower);
        RESTRICTED_HOSTS
            .iter()
            .any(|host| without_scheme.starts_with(host))
    }
}

/// Fixed-window limit on viewport captures, modelled on the browser's cap
/// on visible-tab captures.
#[derive(Debug)]
pub struct CaptureThrottle {
    max_captures: u32,
    window: Duration,
    state: Mutex<ThrottleWindow>,
}

#[derive(Debug)]
struct ThrottleWindow {
    count: u32,
    started: Instant,
}

impl Default for CaptureThrottle {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

impl CaptureThrottle {
    /// Allow `max_captures` per `window`
    pub fn new(max_captures: u32, window: Duration) -> Self {
        Self {
            max_captures,
            window,
            state: Mutex::new(ThrottleWindow {
                count: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Throttle that never refuses
    pub fn unlimited() -> Self {
        Self::new(u32::MAX, Duration::from_secs(1))
    }

    /// Check if a capture is allowed (and count it if so)
    pub fn check(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();

        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }

        if state.count < self.max_captures {
            state.count += 1;
            true
        } else {
            false
        }
    }

    /// Captures left in the current window
    pub fn remaining(&self) -> u32 {
        self.max_captures.saturating_sub(self.state.lock().count)
    }

    /// Time until the current window resets
    pub fn retry_after(&self) -> Duration {
        self.window
            .saturating_sub(self.state.lock().started.elapsed())
    }

    /// Reset the throttle
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.count = 0;
        state.started = Instant::now();
    }
}

/// Page navigator
pub struct PageNavigator;

impl PageNavigator {
    /// Navigate to a URL
    #[instrument(skip(page, options))]
    pub async fn goto(
        page: &PageHandle,
        url: &str,
        options: Option<NavigationOptions>,
    ) -> Result<NavigationResult> {
        let opts = options.unwrap_or_default();
        let start = Instant::now();

        UrlValidator::validate(url).map_err(NavigationError::InvalidUrl)?;

        info!("Navigating to: {}", url);

        let mut last_error = None;
        for attempt in 0..=opts.retries {
            if attempt > 0 {
                warn!("Navigation retry attempt {} of {}", attempt, opts.retries);
                tokio::time::sleep(Duration::from_millis(opts.retry_delay_ms)).await;
            }

            match Self::navigate_once(&page.page, url, &opts).await {
                Ok(mut result) => {
                    page.set_url(result.final_url.clone()).await;
                    result.duration_ms = start.elapsed().as_millis() as u64;
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Navigation attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            NavigationError::LoadFailed("Navigation failed after all retries".to_string()).into()
        }))
    }

    async fn navigate_once(
        page: &chromiumoxide::Page,
        url: &str,
        opts: &NavigationOptions,
    ) -> Result<NavigationResult> {
        let timeout = Duration::from_millis(opts.timeout_ms);

        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| NavigationError::Timeout(opts.timeout_ms))?
            .map_err(|e| NavigationError::LoadFailed(e.to_string()))?;

        Self::wait_for_ready(page, opts).await?;

        let final_url = page
            .url()
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .unwrap_or_else(|| url.to_string());

        let title = page
            .evaluate("document.title")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok());

        debug!("Navigation complete: {} -> {}", url, final_url);

        Ok(NavigationResult {
            final_url,
            title,
            duration_ms: 0,
        })
    }

    async fn wait_for_ready(page: &chromiumoxide::Page, opts: &NavigationOptions) -> Result<()> {
        let script = match opts.wait_until {
            WaitUntil::Load => {
                r#"
                    new Promise(resolve => {
                        if (document.readyState === 'complete') {
                            resolve(true);
                        } else {
                            window.addEventListener('load', () => resolve(true));
                        }
                    })
                "#
            }
            WaitUntil::DomContentLoaded => {
                r#"
                    new Promise(resolve => {
                        if (document.readyState !== 'loading') {
                            resolve(true);
                        } else {
                            document.addEventListener('DOMContentLoaded', () => resolve(true));
                        }
                    })
                "#
            }
            WaitUntil::Settled => {
                r#"
                    new Promise(resolve => {
                        if (document.readyState === 'complete') {
                            setTimeout(() => resolve(true), 500);
                        } else {
                            window.addEventListener('load', () => {
                                setTimeout(() => resolve(true), 500);
                            });
                        }
                    })
                "#
            }
        };

        let timeout = Duration::from_millis(opts.timeout_ms);
        tokio::time::timeout(timeout, page.evaluate(script))
            .await
            .map_err(|_| NavigationError::Timeout(opts.timeout_ms))?
            .map_err(|e| Error::cdp(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // NavigationOptions Tests
    // ========================================================================

    #[test]
    fn test_navigation_options_default() {
        let opts = NavigationOptions::default();
        assert_eq!(opts.timeout_ms, 30000);
        assert_eq!(opts.retries, 2);
        assert_eq!(opts.wait_until, WaitUntil::Load);
    }

    // ========================================================================
    // URL Validation Tests
    // ========================================================================

    #[test]
    fn test_url_validation_valid() {
        assert!(UrlValidator::validate("http://example.com").is_ok());
        assert!(UrlValidator::validate("https://example.com").is_ok());
        assert!(UrlValidator::validate("file:///path/to/file.html").is_ok());
    }

    #[test]
    fn test_url_validation_empty() {
        let result = UrlValidator::validate("");
        assert!(result.unwrap_err().contains("empty"));
    }

    #[test]
    fn test_url_validation_no_protocol() {
        let result = UrlValidator::validate("example.com");
        assert!(result.unwrap_err().contains("must start with"));
        assert!(UrlValidator::validate("ftp://example.com").is_err());
    }

    #[test]
    fn test_url_validation_too_long() {
        let long_url = format!("https://example.com/{}", "a".repeat(3000));
        assert!(UrlValidator::validate(&long_url)
            .unwrap_err()
            .contains("maximum length"));
    }

    // ========================================================================
    // Restricted Surface Tests
    // ========================================================================

    #[test]
    fn test_restricted_browser_pages() {
        assert!(UrlValidator::is_restricted("chrome://settings"));
        assert!(UrlValidator::is_restricted("chrome-extension://abc/popup.html"));
        assert!(UrlValidator::is_restricted("devtools://devtools/bundled/inspector.html"));
        assert!(UrlValidator::is_restricted("CHROME://newtab"));
        assert!(UrlValidator::is_restricted("about:flags"));
    }

    #[test]
    fn test_restricted_store_pages() {
        assert!(UrlValidator::is_restricted(
            "https://chrome.google.com/webstore/detail/xyz"
        ));
        assert!(UrlValidator::is_restricted(
            "https://chrome.google.com/extensions"
        ));
        assert!(!UrlValidator::is_restricted("https://chrome.google.com/"));
    }

    #[test]
    fn test_ordinary_pages_allowed() {
        assert!(!UrlValidator::is_restricted("https://example.com"));
        assert!(!UrlValidator::is_restricted("http://localhost:3000/chrome://"));
        assert!(!UrlValidator::is_restricted("file:///tmp/page.html"));
        assert!(!UrlValidator::is_restricted("about:blank"));
    }

    // ========================================================================
    // Capture Throttle Tests
    // ========================================================================

    #[test]
    fn test_throttle_allows_within_window() {
        let throttle = CaptureThrottle::new(2, Duration::from_secs(60));
        assert!(throttle.check());
        assert!(throttle.check());
        assert_eq!(throttle.remaining(), 0);
        assert!(!throttle.check());
    }

    #[test]
    fn test_throttle_reset() {
        let throttle = CaptureThrottle::new(1, Duration::from_secs(60));
        assert!(throttle.check());
        assert!(!throttle.check());
        throttle.reset();
        assert!(throttle.check());
    }

    #[test]
    fn test_throttle_window_expires() {
        let throttle = CaptureThrottle::new(1, Duration::from_millis(10));
        assert!(throttle.check());
        assert!(!throttle.check());
        std::thread::sleep(Duration::from_millis(20));
        assert!(throttle.check());
    }

    #[test]
    fn test_unlimited_throttle() {
        let throttle = CaptureThrottle::unlimited();
        for _ in 0..100 {
            assert!(throttle.check());
        }
        assert!(throttle.retry_after() <= Duration::from_secs(1));
    }
}
