//! Page agent message endpoint
//!
//! The capture driver talks to the page exclusively through
//! [`AgentRequest`] messages. Each request is answered by an
//! [`AgentOutcome`], a tagged result whose success variants are specific to
//! the action, so callers match exhaustively instead of probing optional
//! fields.

use crate::error::{Error, MutationError, Result, ScrollError};
use crate::page::{PageMutator, ScrollController, Surface};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Request sent to the page agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AgentRequest {
    /// Report the full page height
    CaptureFullPage,
    /// Report the viewport height
    GetViewportHeight,
    /// Enter the prepared state
    PrepareCapture,
    /// Jump to a vertical offset
    ScrollTo {
        /// Target offset in CSS pixels
        position: u32,
    },
    /// Report the current scroll offset
    GetScrollPosition,
    /// Hide fixed elements
    HideFixedElements,
    /// Show previously hidden fixed elements
    ShowFixedElements,
    /// Revert every mutation
    RestoreStyles,
    /// Hide `nav` and `header`
    HideNavigation,
    /// Show `nav` and `header` again
    ShowNavigation,
    /// Wait for document and images to load
    CheckPageLoad,
}

impl AgentRequest {
    /// Action name as it appears on the wire
    pub fn action(&self) -> &'static str {
        match self {
            AgentRequest::CaptureFullPage => "captureFullPage",
            AgentRequest::GetViewportHeight => "getViewportHeight",
            AgentRequest::PrepareCapture => "prepareCapture",
            AgentRequest::ScrollTo { .. } => "scrollTo",
            AgentRequest::GetScrollPosition => "getScrollPosition",
            AgentRequest::HideFixedElements => "hideFixedElements",
            AgentRequest::ShowFixedElements => "showFixedElements",
            AgentRequest::RestoreStyles => "restoreStyles",
            AgentRequest::HideNavigation => "hideNavigation",
            AgentRequest::ShowNavigation => "showNavigation",
            AgentRequest::CheckPageLoad => "checkPageLoad",
        }
    }
}

/// Successful reply, one variant per action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentResponse {
    /// Reply to `captureFullPage`
    FullHeight(u32),
    /// Reply to `getViewportHeight`
    ViewportHeight(u32),
    /// Reply to `prepareCapture`
    Prepared,
    /// Reply to `scrollTo`
    Scrolled,
    /// Reply to `getScrollPosition`
    ScrollPosition(u32),
    /// Reply to `hideFixedElements`
    FixedHidden,
    /// Reply to `showFixedElements`
    FixedShown,
    /// Reply to `restoreStyles`
    Restored,
    /// Reply to `hideNavigation`
    NavigationHidden,
    /// Reply to `showNavigation`
    NavigationShown,
    /// Reply to `checkPageLoad`
    PageLoad {
        /// Whether the page finished loading in time
        loaded: bool,
    },
}

/// Which part of the agent failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Style mutation or restore
    #[default]
    Mutation,
    /// Scrolling or page metrics
    Scroll,
    /// Anything else the page reported
    Page,
}

impl FailureKind {
    fn of(err: &Error) -> Self {
        match err {
            Error::Mutation(_) => FailureKind::Mutation,
            Error::Scroll(_) => FailureKind::Scroll,
            _ => FailureKind::Page,
        }
    }
}

/// Failed reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    /// Action that failed
    pub action: String,
    /// Error message
    pub error: String,
    /// Error category, kept when the failure is turned back into an [`Error`]
    #[serde(default)]
    pub kind: FailureKind,
}

/// Outcome of one request
pub type AgentOutcome = std::result::Result<AgentResponse, AgentFailure>;

/// Render an outcome in the `{success, ...}` wire shape
pub fn to_wire(outcome: &AgentOutcome) -> Value {
    match outcome {
        Ok(AgentResponse::FullHeight(h)) => json!({ "success": true, "fullHeight": h }),
        Ok(AgentResponse::ViewportHeight(h)) => json!({ "success": true, "viewportHeight": h }),
        Ok(AgentResponse::ScrollPosition(p)) => {
            json!({ "success": true, "scrollPosition": p })
        }
        Ok(AgentResponse::PageLoad { loaded }) => json!({ "success": true, "loaded": loaded }),
        Ok(_) => json!({ "success": true }),
        Err(failure) => json!({ "success": false, "error": failure.error }),
    }
}

/// In-page endpoint for one capture session
pub struct PageAgent<'a, S: Surface + ?Sized> {
    scroll: ScrollController<'a, S>,
    mutator: PageMutator<'a, S>,
    surface: &'a S,
    load_timeout: Duration,
}

impl<'a, S: Surface + ?Sized> PageAgent<'a, S> {
    /// Create an agent whose mutations are keyed by `session_key`
    pub fn new(
        surface: &'a S,
        session_key: impl Into<String>,
        auto_revert: Duration,
        load_timeout: Duration,
    ) -> Self {
        Self {
            scroll: ScrollController::new(surface),
            mutator: PageMutator::new(surface, session_key, auto_revert),
            surface,
            load_timeout,
        }
    }

    /// The session's mutator
    pub fn mutator(&self) -> &PageMutator<'a, S> {
        &self.mutator
    }

    /// The session's scroll controller
    pub fn scroll(&self) -> &ScrollController<'a, S> {
        &self.scroll
    }

    /// Handle one request. Failures are reported, never thrown.
    #[instrument(skip(self), fields(action = request.action()))]
    pub async fn handle(&mut self, request: AgentRequest) -> AgentOutcome {
        let action = request.action();
        match self.dispatch(request).await {
            Ok(response) => {
                debug!("{} ok", action);
                Ok(response)
            }
            Err(e) => {
                warn!("Error in {}: {}", action, e);
                Err(AgentFailure {
                    action: action.to_string(),
                    error: e.to_string(),
                    kind: FailureKind::of(&e),
                })
            }
        }
    }

    async fn dispatch(&mut self, request: AgentRequest) -> Result<AgentResponse> {
        match request {
            AgentRequest::CaptureFullPage => {
                Ok(AgentResponse::FullHeight(self.scroll.full_height().await?))
            }
            AgentRequest::GetViewportHeight => Ok(AgentResponse::ViewportHeight(
                self.scroll.viewport_height().await?,
            )),
            AgentRequest::PrepareCapture => {
                self.mutator.prepare().await?;
                Ok(AgentResponse::Prepared)
            }
            AgentRequest::ScrollTo { position } => {
                self.scroll.scroll_to(position).await?;
                Ok(AgentResponse::Scrolled)
            }
            AgentRequest::GetScrollPosition => Ok(AgentResponse::ScrollPosition(
                self.scroll.scroll_position().await?,
            )),
            AgentRequest::HideFixedElements => {
                self.mutator.hide_fixed().await?;
                Ok(AgentResponse::FixedHidden)
            }
            AgentRequest::ShowFixedElements => {
                self.mutator.show_fixed().await?;
                Ok(AgentResponse::FixedShown)
            }
            AgentRequest::RestoreStyles => {
                self.mutator.restore().await?;
                Ok(AgentResponse::Restored)
            }
            AgentRequest::HideNavigation => {
                self.mutator.hide_navigation().await?;
                Ok(AgentResponse::NavigationHidden)
            }
            AgentRequest::ShowNavigation => {
                self.mutator.show_navigation().await?;
                Ok(AgentResponse::NavigationShown)
            }
            AgentRequest::CheckPageLoad => {
                let loaded = match tokio::time::timeout(self.load_timeout, self.surface.wait_loaded())
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        debug!("Page load check timed out after {:?}", self.load_timeout);
                        false
                    }
                };
                Ok(AgentResponse::PageLoad { loaded })
            }
        }
    }
}

impl From<AgentFailure> for Error {
    fn from(failure: AgentFailure) -> Self {
        let AgentFailure {
            action,
            error,
            kind,
        } = failure;
        match kind {
            FailureKind::Mutation => MutationError::Rejected { action, error }.into(),
            FailureKind::Scroll => ScrollError::Rejected { action, error }.into(),
            FailureKind::Page => Error::generic(format!("{} failed: {}", action, error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(AgentRequest::ScrollTo { position: 1000 }).unwrap();
        assert_eq!(json, json!({ "action": "scrollTo", "position": 1000 }));

        let json = serde_json::to_value(AgentRequest::HideFixedElements).unwrap();
        assert_eq!(json, json!({ "action": "hideFixedElements" }));
    }

    #[test]
    fn test_request_parse() {
        let request: AgentRequest =
            serde_json::from_str(r#"{"action":"getScrollPosition"}"#).unwrap();
        assert_eq!(request, AgentRequest::GetScrollPosition);
        assert_eq!(request.action(), "getScrollPosition");
    }

    #[test]
    fn test_response_wire_format() {
        assert_eq!(
            to_wire(&Ok(AgentResponse::FullHeight(2500))),
            json!({ "success": true, "fullHeight": 2500 })
        );
        assert_eq!(
            to_wire(&Ok(AgentResponse::ScrollPosition(1500))),
            json!({ "success": true, "scrollPosition": 1500 })
        );
        assert_eq!(
            to_wire(&Ok(AgentResponse::PageLoad { loaded: true })),
            json!({ "success": true, "loaded": true })
        );
        assert_eq!(
            to_wire(&Ok(AgentResponse::Restored)),
            json!({ "success": true })
        );
    }

    #[test]
    fn test_failure_wire_format() {
        let outcome: AgentOutcome = Err(AgentFailure {
            action: "prepareCapture".to_string(),
            error: "boom".to_string(),
            kind: FailureKind::Mutation,
        });
        assert_eq!(to_wire(&outcome), json!({ "success": false, "error": "boom" }));
    }

    #[test]
    fn test_failure_into_error() {
        let err: Error = AgentFailure {
            action: "restoreStyles".to_string(),
            error: "detached".to_string(),
            kind: FailureKind::Mutation,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Mutation error: restoreStyles rejected by page: detached"
        );
    }

    #[test]
    fn test_failure_keeps_error_kind() {
        let err: Error = AgentFailure {
            action: "scrollTo".to_string(),
            error: "target closed".to_string(),
            kind: FailureKind::Scroll,
        }
        .into();
        assert!(matches!(err, Error::Scroll(ScrollError::Rejected { .. })));
        assert_eq!(err.kind(), "scroll");

        let err: Error = AgentFailure {
            action: "checkPageLoad".to_string(),
            error: "CDP error: socket closed".to_string(),
            kind: FailureKind::Page,
        }
        .into();
        assert_eq!(err.kind(), "generic");
        assert_eq!(err.to_string(), "checkPageLoad failed: CDP error: socket closed");
    }

    #[test]
    fn test_failure_kind_of() {
        assert_eq!(
            FailureKind::of(&ScrollError::EmptyViewport.into()),
            FailureKind::Scroll
        );
        assert_eq!(
            FailureKind::of(&MutationError::Script("x".to_string()).into()),
            FailureKind::Mutation
        );
        assert_eq!(FailureKind::of(&Error::cdp("gone")), FailureKind::Page);
    }
}
