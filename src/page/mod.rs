//! In-page agents
//!
//! Everything that runs against the target page lives here: the [`Surface`]
//! trait describing the platform primitives of one tab, the
//! [`PageMutator`] that neutralizes fixed/sticky layout, the
//! [`ScrollController`], and the [`PageAgent`] message endpoint the capture
//! driver talks to.

pub mod agent;
pub mod mutator;
pub mod scroll;

pub use agent::{
    to_wire, AgentFailure, AgentOutcome, AgentRequest, AgentResponse, FailureKind, PageAgent,
};
pub use mutator::{MutatorState, PageMutator, SnapshotEntry, StyleSnapshot};
pub use scroll::{ScrollController, Settle};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a capturable surface (a browser tab)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub String);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(s: &str) -> Self {
        SurfaceId(s.to_string())
    }
}

impl From<String> for SurfaceId {
    fn from(s: String) -> Self {
        SurfaceId(s)
    }
}

/// Handle to a page element, valid until [`Surface::release_elements`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u32);

/// Something whose inline style can be read and written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum StyleTarget {
    /// `document.documentElement`
    Root,
    /// `document.body`
    Body,
    /// An element previously returned by [`Surface::query`]
    Element(ElementId),
}

/// Computed CSS `position` values the mutator cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// `position: fixed`
    Fixed,
    /// `position: sticky`
    Sticky,
}

/// Element lookup sent to the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementQuery {
    /// Every element whose computed position is one of `positions`
    Positioned {
        /// Positions to match
        positions: Vec<Position>,
    },
    /// Every element matching a CSS selector
    Selector {
        /// CSS selector
        selector: String,
    },
}

/// Viewport-relative bounding box
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Top edge relative to the viewport
    pub top: f64,
    /// Left edge relative to the viewport
    pub left: f64,
    /// Width in CSS pixels
    pub width: f64,
    /// Height in CSS pixels
    pub height: f64,
}

/// Viewport-relative point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Distance from the viewport top
    pub top: f64,
    /// Distance from the viewport left edge
    pub left: f64,
}

/// An element returned by [`Surface::query`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Handle for later style operations
    pub id: ElementId,
    /// Computed `position` at query time
    pub position: String,
    /// Bounding box at query time
    pub rect: Rect,
    /// Padding-box corner of the block an absolutely positioned element
    /// would be placed in once `body` is made relative. Reported for fixed
    /// elements only; `None` means the document itself.
    #[serde(default)]
    pub container: Option<Point>,
}

/// An inline style declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineValue {
    /// Declared value
    pub value: String,
    /// Whether it carries `!important`
    pub important: bool,
}

/// One property as it was before a mutation touched it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedProperty {
    /// CSS property name
    pub property: String,
    /// Computed value
    pub computed: String,
    /// Inline declaration, if the element had one
    pub inline: Option<InlineValue>,
}

/// What to do with one inline property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StyleAction {
    /// `style.setProperty(property, value, priority)`
    Set {
        /// Value to set
        value: String,
        /// Set with `!important`
        important: bool,
    },
    /// `style.removeProperty(property)`
    Remove,
}

/// A single inline-style write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleOp {
    /// Element to write
    pub target: StyleTarget,
    /// CSS property name
    pub property: String,
    /// Write to perform
    pub action: StyleAction,
}

impl StyleOp {
    /// Set `property: value !important`
    pub fn force(target: StyleTarget, property: &str, value: impl Into<String>) -> Self {
        Self {
            target,
            property: property.to_string(),
            action: StyleAction::Set {
                value: value.into(),
                important: true,
            },
        }
    }

    /// Remove an inline property
    pub fn remove(target: StyleTarget, property: &str) -> Self {
        Self {
            target,
            property: property.to_string(),
            action: StyleAction::Remove,
        }
    }

    /// The op that puts `saved` back.
    ///
    /// An inline declaration is reinstated verbatim unless its value was
    /// `auto`; anything else is removed so no inline style leaks.
    pub fn restore(target: StyleTarget, saved: &SavedProperty) -> Self {
        match &saved.inline {
            Some(inline) if !inline.value.is_empty() && inline.value != "auto" => Self {
                target,
                property: saved.property.clone(),
                action: StyleAction::Set {
                    value: inline.value.clone(),
                    important: inline.important,
                },
            },
            _ => Self::remove(target, &saved.property),
        }
    }
}

/// Page and viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDimensions {
    /// max(documentElement.scrollHeight, body.scrollHeight)
    pub full_height: u32,
    /// window.innerHeight
    pub viewport_height: u32,
    /// window.innerWidth
    pub viewport_width: u32,
}

/// Platform primitives of one capturable tab.
///
/// Implementations run each call inside the page (or, for
/// [`capture_viewport`](Surface::capture_viewport), against the browser's
/// raster primitive) and report failures as [`crate::Error`]s.
#[async_trait]
pub trait Surface: Send + Sync {
    /// Stable identifier of this surface
    fn id(&self) -> SurfaceId;

    /// Current URL
    async fn url(&self) -> Result<String>;

    /// Page and viewport dimensions
    async fn dimensions(&self) -> Result<PageDimensions>;

    /// Jump (non-animated) to a vertical offset
    async fn scroll_to(&self, offset: u32) -> Result<()>;

    /// Current vertical scroll offset
    async fn scroll_offset(&self) -> Result<u32>;

    /// Find elements and register handles for them
    async fn query(&self, query: &ElementQuery) -> Result<Vec<ElementInfo>>;

    /// Read computed and inline values of `properties` on `target`
    async fn read_styles(
        &self,
        target: StyleTarget,
        properties: &[&str],
    ) -> Result<Vec<SavedProperty>>;

    /// Apply inline style writes in order
    async fn apply_styles(&self, ops: &[StyleOp]) -> Result<()>;

    /// Arm an in-page timer that applies `ops` after `delay` unless cancelled.
    /// Re-arming the same key replaces the previous timer.
    async fn schedule_revert(&self, key: &str, ops: &[StyleOp], delay: Duration) -> Result<()>;

    /// Cancel a timer armed with [`schedule_revert`](Surface::schedule_revert)
    async fn cancel_revert(&self, key: &str) -> Result<()>;

    /// Forget every element handle handed out by [`query`](Surface::query)
    async fn release_elements(&self) -> Result<()>;

    /// Insert a `<style>` element with the given id, if absent
    async fn insert_stylesheet(&self, id: &str, css: &str) -> Result<()>;

    /// Remove the `<style>` element with the given id, if present
    async fn remove_stylesheet(&self, id: &str) -> Result<()>;

    /// Resolve once the document and its images have finished loading
    async fn wait_loaded(&self) -> Result<bool>;

    /// Capture the visible viewport as PNG bytes.
    ///
    /// Returns [`crate::error::CaptureError::Throttled`] when the platform's
    /// capture rate is exceeded.
    async fn capture_viewport(&self) -> Result<Vec<u8>>;
}
