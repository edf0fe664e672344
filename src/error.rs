//! Error types for fullshot-web
//!
//! This module provides the error hierarchy for the capture pipeline using
//! `thiserror`. Every fatal error aborts the active capture session; the
//! driver still runs its cleanup sequence before surfacing it.

use thiserror::Error;

/// The main error type for fullshot-web operations
#[derive(Error, Debug)]
pub enum Error {
    /// Browser-related errors
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Navigation errors
    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    /// Capture errors (restricted surface, throttling, screenshot failures)
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Page mutation errors
    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    /// Scroll controller errors
    #[error("Scroll error: {0}")]
    Scroll(#[from] ScrollError),

    /// Image composition errors
    #[error("Stitch error: {0}")]
    Stitch(#[from] StitchError),

    /// Handoff store errors
    #[error("Handoff error: {0}")]
    Handoff(#[from] HandoffError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ChromiumOxide errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Browser lifecycle and control errors
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Failed to launch browser
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    /// Browser configuration error
    #[error("Invalid browser configuration: {0}")]
    ConfigError(String),

    /// Failed to create new page/tab
    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),
}

/// Navigation errors
#[derive(Error, Debug)]
pub enum NavigationError {
    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Navigation timeout
    #[error("Navigation timed out after {0}ms")]
    Timeout(u64),

    /// Page load failed
    #[error("Page load failed: {0}")]
    LoadFailed(String),
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The surface is a browser-internal page that cannot be captured
    #[error("This page cannot be captured: {0}")]
    RestrictedSurface(String),

    /// The platform reported a capture-rate condition for a single attempt
    #[error("Capture throttled: {0}")]
    Throttled(String),

    /// Capture stayed throttled after every retry
    #[error("Capture rate limit exceeded after {attempts} attempts")]
    RateLimited {
        /// Number of attempts made, including the first
        attempts: u32,
    },

    /// Screenshot failed
    #[error("Screenshot capture failed: {0}")]
    ScreenshotFailed(String),
}

/// Errors raised while mutating or restoring page styles
#[derive(Error, Debug)]
pub enum MutationError {
    /// An in-page script threw
    #[error("In-page script failed: {0}")]
    Script(String),

    /// The mutator was asked for a transition its current state forbids
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        /// Current mutator state
        state: String,
        /// Requested action
        action: String,
    },

    /// The page agent answered a request with a failure
    #[error("{action} rejected by page: {error}")]
    Rejected {
        /// Action name as it appears on the wire
        action: String,
        /// Error message reported by the page
        error: String,
    },
}

/// Scroll controller errors
#[derive(Error, Debug)]
pub enum ScrollError {
    /// The page refused or failed the scroll
    #[error("Scroll to {offset} failed: {message}")]
    ScrollFailed {
        /// Requested offset
        offset: u32,
        /// Page-side error message
        message: String,
    },

    /// Page metrics could not be read
    #[error("Failed to read page metrics: {0}")]
    MetricsFailed(String),

    /// Page reported a zero-height viewport
    #[error("Viewport height is zero")]
    EmptyViewport,

    /// The page agent answered a scroll or metrics request with a failure
    #[error("{action} rejected by page: {error}")]
    Rejected {
        /// Action name as it appears on the wire
        action: String,
        /// Error message reported by the page
        error: String,
    },
}

/// Image composition errors
#[derive(Error, Debug)]
pub enum StitchError {
    /// No bands were captured
    #[error("No bands to stitch")]
    NoBands,

    /// Requested composite dimensions are unusable
    #[error("Invalid composite dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Composite width
        width: u32,
        /// Composite height
        height: u32,
    },

    /// A captured band could not be decoded
    #[error("Band {index} could not be decoded: {message}")]
    Decode {
        /// Band index in capture order
        index: usize,
        /// Decoder message
        message: String,
    },

    /// The composite could not be encoded
    #[error("Composite encoding failed: {0}")]
    Encode(String),
}

/// Handoff store errors
#[derive(Error, Debug)]
pub enum HandoffError {
    /// The persisted slot is corrupt
    #[error("Handoff slot is corrupt: {0}")]
    Corrupt(String),
}

/// Result type alias for fullshot-web operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic error from a string
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Error::Generic(msg.into())
    }

    /// Create a CDP error from a string
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// Whether this error is a single throttled capture attempt
    pub fn is_throttled(&self) -> bool {
        matches!(self, Error::Capture(CaptureError::Throttled(_)))
    }

    /// Short label used for metrics breakdowns
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Browser(_) => "browser",
            Error::Navigation(_) => "navigation",
            Error::Capture(CaptureError::RestrictedSurface(_)) => "restricted_surface",
            Error::Capture(CaptureError::RateLimited { .. }) => "rate_limit",
            Error::Capture(_) => "capture",
            Error::Mutation(_) => "mutation",
            Error::Scroll(_) => "scroll",
            Error::Stitch(_) => "stitch",
            Error::Handoff(_) => "handoff",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Cdp(_) => "cdp",
            Error::Generic(_) => "generic",
        }
    }
}

/// Convert chromiumoxide errors
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}

impl From<image::ImageError> for StitchError {
    fn from(err: image::ImageError) -> Self {
        StitchError::Encode(err.to_string())
    }
}
