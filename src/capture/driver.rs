//! Capture driver
//!
//! Orchestrates one capture session against a [`Surface`]:
//!
//! ```text
//!  validate ─▶ lock surface ─▶ hide scrollbars ─┐
//!                                                ▼
//!     ┌──────────── PageAgent round-trips ──────────────┐
//!     │ checkPageLoad ─▶ captureFullPage ─▶ prepare      │
//!     │ scrollTo(0) ─▶ capture ─▶ hideFixedElements      │
//!     │ loop: scrollTo ─▶ settle ─▶ getScrollPosition    │
//!     │        └─ unchanged? stop : capture              │
//!     └── always: showFixed ─▶ showNavigation ─▶ restore ┘
//!                                                ▼
//!     always: show scrollbars ─▶ stitch ─▶ handoff store
//! ```
//!
//! Every step that mutates the page is paired with a reversal that runs
//! whether or not a later step fails.

use crate::browser::UrlValidator;
use crate::capture::{CaptureConfig, CaptureSession, SessionRegistry};
use crate::error::{CaptureError, Error, Result};
use crate::handoff::{HandoffEntry, HandoffStore};
use crate::metrics::global_metrics;
use crate::page::{
    AgentRequest, AgentResponse, MutatorState, PageAgent, ScrollController, Surface,
};
use crate::stitch::{CompositeImage, RasterBand, Stitcher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Id of the stylesheet that hides scrollbars during capture
pub const SCROLLBAR_STYLE_ID: &str = "fullshot-hide-scrollbar";

const SCROLLBAR_CSS: &str = r#"
    ::-webkit-scrollbar {
        display: none !important;
    }
    * {
        scrollbar-width: none !important;
        -ms-overflow-style: none !important;
    }
"#;

/// Capture driver
pub struct CaptureDriver {
    config: CaptureConfig,
    store: Arc<HandoffStore>,
    sessions: SessionRegistry,
    progress: Option<watch::Sender<u8>>,
}

impl CaptureDriver {
    /// Create a driver writing into `store`
    pub fn new(config: CaptureConfig, store: Arc<HandoffStore>) -> Self {
        Self {
            config,
            store,
            sessions: SessionRegistry::new(),
            progress: None,
        }
    }

    /// Publish progress (0-100) of each full-page session on `tx`
    pub fn with_progress(mut self, tx: watch::Sender<u8>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Driver configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Handoff store the driver writes into
    pub fn store(&self) -> &Arc<HandoffStore> {
        &self.store
    }

    /// Capture the whole scrollable page, stitch it, and store the result
    #[instrument(skip(self, surface), fields(surface = %surface.id()))]
    pub async fn run_full_page_capture<S: Surface + ?Sized>(
        &self,
        surface: &S,
    ) -> Result<CompositeImage> {
        let started = Instant::now();
        global_metrics().record_session_start();

        let result = self.full_page(surface).await;
        record_outcome(&result, started);
        result
    }

    /// Capture only the visible viewport and store it
    #[instrument(skip(self, surface), fields(surface = %surface.id()))]
    pub async fn capture_visible<S: Surface + ?Sized>(
        &self,
        surface: &S,
    ) -> Result<CompositeImage> {
        let started = Instant::now();
        global_metrics().record_session_start();

        let result = self.visible(surface).await;
        record_outcome(&result, started);
        result
    }

    async fn full_page<S: Surface + ?Sized>(&self, surface: &S) -> Result<CompositeImage> {
        let url = surface.url().await?;
        ensure_capturable(&url)?;

        let _guard = self.sessions.acquire(&surface.id()).await;
        let mut session = CaptureSession::new(surface.id(), self.progress.clone());
        session.set_progress(0);
        info!(session = %session.id, "Starting full-page capture of {}", url);

        let outcome = match hide_scrollbars(surface).await {
            Ok(()) => self.capture_bands(surface, &mut session).await,
            Err(e) => Err(e),
        };
        let cleanup = show_scrollbars(surface).await;
        first_error(outcome, cleanup, "Scrollbar restore")?;

        let (full_height, viewport_height) = composite_heights(&session);
        let composite = Stitcher::compose(&session.bands, full_height, viewport_height)?;
        info!(
            session = %session.id,
            "Stitched {} bands into {}x{}",
            session.bands.len(),
            composite.width(),
            composite.height()
        );

        self.store
            .put(HandoffEntry::new(session.id, url, composite.clone()))?;
        session.set_progress(100);
        Ok(composite)
    }

    async fn visible<S: Surface + ?Sized>(&self, surface: &S) -> Result<CompositeImage> {
        let url = surface.url().await?;
        ensure_capturable(&url)?;

        let _guard = self.sessions.acquire(&surface.id()).await;
        let session = CaptureSession::new(surface.id(), None);
        info!(session = %session.id, "Capturing visible viewport of {}", url);

        let outcome = match hide_scrollbars(surface).await {
            Ok(()) => {
                match ScrollController::new(surface)
                    .settle(&self.config.settle)
                    .await
                {
                    Ok(()) => self.capture_with_retry(surface).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        let cleanup = show_scrollbars(surface).await;

        let png = match (outcome, cleanup) {
            (Ok(png), Ok(())) => png,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), cleanup) => {
                if let Err(c) = cleanup {
                    warn!("Scrollbar restore failed after an earlier error: {}", c);
                }
                return Err(e);
            }
        };

        let band = RasterBand::decode(0, 0, &png)?;
        global_metrics().record_band();
        let composite = Stitcher::compose(&[band.clone()], band.height(), band.height())?;

        self.store
            .put(HandoffEntry::new(session.id, url, composite.clone()))?;
        Ok(composite)
    }

    /// Agent round-trips of one session; always restores the page
    async fn capture_bands<S: Surface + ?Sized>(
        &self,
        surface: &S,
        session: &mut CaptureSession,
    ) -> Result<()> {
        let mut agent = PageAgent::new(
            surface,
            session.id.to_string(),
            self.config.auto_revert,
            self.config.load_timeout,
        );

        if self.config.wait_for_load {
            if let AgentResponse::PageLoad { loaded: false } =
                send(&mut agent, AgentRequest::CheckPageLoad).await?
            {
                warn!("Page still loading after {:?}, capturing anyway", self.config.load_timeout);
            }
        }

        session.full_height = match send(&mut agent, AgentRequest::CaptureFullPage).await? {
            AgentResponse::FullHeight(height) => height,
            other => return Err(unexpected(AgentRequest::CaptureFullPage, other)),
        };
        session.viewport_height = match send(&mut agent, AgentRequest::GetViewportHeight).await? {
            AgentResponse::ViewportHeight(height) => height,
            other => return Err(unexpected(AgentRequest::GetViewportHeight, other)),
        };
        debug!(
            "Page is {}px tall with a {}px viewport",
            session.full_height, session.viewport_height
        );

        let outcome = self.scroll_and_capture(surface, &mut agent, session).await;
        let cleanup = self.restore_page(&mut agent).await;
        first_error(outcome, cleanup, "Style restore")
    }

    async fn scroll_and_capture<S: Surface + ?Sized>(
        &self,
        surface: &S,
        agent: &mut PageAgent<'_, S>,
        session: &mut CaptureSession,
    ) -> Result<()> {
        send(agent, AgentRequest::PrepareCapture).await?;
        if self.config.hide_navigation {
            send(agent, AgentRequest::HideNavigation).await?;
        }
        agent.scroll().settle(&self.config.settle).await?;

        send(agent, AgentRequest::ScrollTo { position: 0 }).await?;
        agent.scroll().settle(&self.config.settle).await?;
        let mut last_offset = scroll_position(agent).await?;
        session.scroll_offset = last_offset;
        self.capture_band(surface, session).await?;

        send(agent, AgentRequest::HideFixedElements).await?;

        let viewport_height = session.viewport_height;
        let mut target = viewport_height;
        while target <= session.full_height {
            send(agent, AgentRequest::ScrollTo { position: target }).await?;
            agent.scroll().settle(&self.config.settle).await?;

            let offset = scroll_position(agent).await?;
            if offset == last_offset {
                let reachable = last_offset.saturating_add(viewport_height);
                debug!(
                    "Scroll limit reached at {} (target {}), page ends at {}px",
                    offset, target, reachable
                );
                session.full_height = session.full_height.min(reachable);
                break;
            }
            last_offset = offset;
            session.scroll_offset = offset;

            self.capture_band(surface, session).await?;
            session.update_progress(target);
            target = target.saturating_add(viewport_height);
        }

        Ok(())
    }

    async fn restore_page<S: Surface + ?Sized>(&self, agent: &mut PageAgent<'_, S>) -> Result<()> {
        let mut result = Ok(());

        if agent.mutator().state() == MutatorState::FixedHidden {
            result = first_error(
                result,
                send(agent, AgentRequest::ShowFixedElements).await.map(drop),
                "showFixedElements",
            );
        }
        if self.config.hide_navigation {
            result = first_error(
                result,
                send(agent, AgentRequest::ShowNavigation).await.map(drop),
                "showNavigation",
            );
        }
        first_error(
            result,
            send(agent, AgentRequest::RestoreStyles).await.map(drop),
            "restoreStyles",
        )
    }

    async fn capture_band<S: Surface + ?Sized>(
        &self,
        surface: &S,
        session: &mut CaptureSession,
    ) -> Result<()> {
        let png = self.capture_with_retry(surface).await?;
        let band = RasterBand::decode(session.bands.len(), session.scroll_offset, &png)?;
        debug!(
            "Captured band {} at offset {} ({}x{})",
            band.index(),
            band.offset(),
            band.width(),
            band.height()
        );
        session.bands.push(band);
        global_metrics().record_band();
        Ok(())
    }

    /// One viewport capture, retrying throttled attempts with a fixed backoff
    async fn capture_with_retry<S: Surface + ?Sized>(&self, surface: &S) -> Result<Vec<u8>> {
        let policy = self.config.retry;
        let mut retries = 0;

        loop {
            match surface.capture_viewport().await {
                Ok(png) => return Ok(png),
                Err(e) if e.is_throttled() && retries < policy.max_retries => {
                    retries += 1;
                    warn!(
                        "Capture throttled, retry {} of {} in {:?}",
                        retries, policy.max_retries, policy.backoff
                    );
                    global_metrics().record_rate_limit_retry();
                    if !policy.backoff.is_zero() {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
                Err(e) if e.is_throttled() => {
                    return Err(CaptureError::RateLimited {
                        attempts: retries + 1,
                    }
                    .into())
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reject browser-internal surfaces before touching them
fn ensure_capturable(url: &str) -> Result<()> {
    if UrlValidator::is_restricted(url) {
        return Err(CaptureError::RestrictedSurface(url.to_string()).into());
    }
    Ok(())
}

async fn hide_scrollbars<S: Surface + ?Sized>(surface: &S) -> Result<()> {
    surface
        .insert_stylesheet(SCROLLBAR_STYLE_ID, SCROLLBAR_CSS)
        .await
}

async fn show_scrollbars<S: Surface + ?Sized>(surface: &S) -> Result<()> {
    surface.remove_stylesheet(SCROLLBAR_STYLE_ID).await
}

async fn send<S: Surface + ?Sized>(
    agent: &mut PageAgent<'_, S>,
    request: AgentRequest,
) -> Result<AgentResponse> {
    agent.handle(request).await.map_err(Error::from)
}

async fn scroll_position<S: Surface + ?Sized>(agent: &mut PageAgent<'_, S>) -> Result<u32> {
    match send(agent, AgentRequest::GetScrollPosition).await? {
        AgentResponse::ScrollPosition(offset) => Ok(offset),
        other => Err(unexpected(AgentRequest::GetScrollPosition, other)),
    }
}

fn unexpected(request: AgentRequest, response: AgentResponse) -> Error {
    Error::generic(format!(
        "Unexpected reply to {}: {:?}",
        request.action(),
        response
    ))
}

/// Keep the first error; log cleanup failures that follow one
fn first_error(primary: Result<()>, cleanup: Result<()>, step: &str) -> Result<()> {
    match (primary, cleanup) {
        (Err(e), Err(c)) => {
            warn!("{} failed after an earlier error: {}", step, c);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), cleanup) => cleanup,
    }
}

/// Composite and viewport heights in band pixels
fn composite_heights(session: &CaptureSession) -> (u32, u32) {
    let band_height = session
        .bands
        .first()
        .map(|band| band.height())
        .unwrap_or(session.viewport_height);
    if session.viewport_height == 0 || band_height == session.viewport_height {
        return (session.full_height, session.viewport_height);
    }

    let scale = f64::from(band_height) / f64::from(session.viewport_height);
    debug!("Scaling composite by device pixel ratio {:.2}", scale);
    let full_height = (f64::from(session.full_height) * scale).round() as u32;
    (full_height, band_height)
}

fn record_outcome(result: &Result<CompositeImage>, started: Instant) {
    match result {
        Ok(_) => global_metrics().record_session_complete(started.elapsed()),
        Err(e) => {
            warn!("Capture failed: {}", e);
            global_metrics().record_session_failure(e.kind());
        }
    }
}
