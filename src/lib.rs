//! fullshot-web - Full-Page Screenshots for Chromium
//!
//! This crate drives a Chromium tab over the Chrome DevTools Protocol,
//! captures the full scrollable page as a sequence of viewport-sized bands,
//! stitches them into one image, and hands the result to a local viewer.
//!
//! # Features
//!
//! - **Capture Driver**: session orchestration with throttling retries and
//!   guaranteed page restore
//! - **Page Agents**: in-page style mutation and scroll control behind the
//!   [`Surface`](page::Surface) trait
//! - **Stitcher**: deterministic composition of bands into one PNG
//! - **Viewer**: a local HTTP page showing the last capture
//!
//! # Architecture
//!
//! ```text
//! CLI ──▶ Browser Controller ──▶ CdpSurface (tab)
//!              │                     ▲
//!              ▼                     │ agent requests
//!        Capture Driver ──▶ PageAgent (mutator + scroll)
//!              │
//!              ▼
//!          Stitcher ──▶ Handoff Store ──▶ Viewer
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fullshot_web::browser::BrowserController;
//! use fullshot_web::capture::{CaptureConfig, CaptureDriver};
//! use fullshot_web::handoff::HandoffStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = BrowserController::new().await?;
//!     let surface = controller.open("https://example.com").await?;
//!
//!     let store = Arc::new(HandoffStore::in_memory());
//!     let driver = CaptureDriver::new(CaptureConfig::default(), store);
//!     let composite = driver.run_full_page_capture(&surface).await?;
//!
//!     std::fs::write("page.png", composite.to_png()?)?;
//!     controller.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod browser;
pub mod capture;
pub mod error;
pub mod handoff;
pub mod metrics;
pub mod page;
pub mod stitch;
pub mod viewer;

// Re-exports for convenience
pub use browser::{BrowserController, CdpSurface};
pub use capture::{CaptureConfig, CaptureDriver};
pub use error::{Error, Result};
pub use handoff::HandoffStore;
pub use page::{PageAgent, Surface};
pub use stitch::{CompositeImage, Stitcher};
pub use viewer::Viewer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
