//! Capture orchestration
//!
//! Drives a [`Surface`](crate::page::Surface) through one capture session
//! and hands the stitched composite to the [`HandoffStore`](crate::handoff::HandoffStore).

pub mod config;
pub mod driver;
pub mod session;

pub use config::{CaptureConfig, CaptureConfigBuilder, RetryPolicy};
pub use driver::{CaptureDriver, SCROLLBAR_STYLE_ID};
pub use session::{progress_for, CaptureSession, SessionRegistry};
