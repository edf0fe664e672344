//! In-memory page used by the integration tests.
//!
//! Models just enough of a browser tab for the capture pipeline: stylesheet
//! and inline styles per element, a clamped scroll position, in-page revert
//! timers, stylesheets, and a viewport raster whose pixels encode the
//! document row they show.

#![allow(dead_code)]

use async_trait::async_trait;
use fullshot_web::error::{CaptureError, Error, Result};
use fullshot_web::page::{
    ElementId, ElementInfo, ElementQuery, InlineValue, PageDimensions, Point, Position, Rect,
    SavedProperty, StyleAction, StyleOp, StyleTarget, Surface, SurfaceId,
};
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::time::Duration;

/// Width of every captured raster
pub const RASTER_WIDTH: u32 = 4;

/// Longhands a shorthand expands to, in CSS order
fn longhands(property: &str) -> Option<&'static [&'static str]> {
    match property {
        "overflow" => Some(&["overflow-x", "overflow-y"][..]),
        "margin" => Some(&["margin-top", "margin-right", "margin-bottom", "margin-left"][..]),
        "inset" => Some(&["top", "right", "bottom", "left"][..]),
        _ => None,
    }
}

const SHORTHANDS: &[&str] = &["overflow", "margin", "inset"];

/// Spread a shorthand value over `longhands` using the 1-4 value syntax
fn expand(longhands: &[&str], value: &str) -> Vec<(String, String)> {
    let mut parts: Vec<&str> = value.split_whitespace().collect();
    if parts.is_empty() {
        parts.push(value);
    }
    longhands
        .iter()
        .enumerate()
        .map(|(i, longhand)| {
            let index = match (longhands.len(), parts.len()) {
                (_, 1) => 0,
                (2, _) => i.min(1),
                (4, 2) => i % 2,
                (4, 3) if i == 3 => 1,
                _ => i.min(parts.len() - 1),
            };
            (longhand.to_string(), parts[index].to_string())
        })
        .collect()
}

/// Join longhand values the way a shorthand serializes them
fn collapse(values: Vec<String>) -> String {
    if values.iter().all(|v| *v == values[0]) {
        values[0].clone()
    } else {
        values.join(" ")
    }
}

/// One styled node. Inline styles are stored as longhands.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub tag: String,
    pub sheet: HashMap<String, String>,
    pub inline: BTreeMap<String, InlineValue>,
    pub rect: Rect,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    /// Computed value: inline, then stylesheet, then the initial value
    pub fn computed(&self, property: &str) -> String {
        if let Some(longhands) = longhands(property) {
            return collapse(longhands.iter().map(|l| self.computed(l)).collect());
        }
        if let Some(inline) = self.inline.get(property) {
            return inline.value.clone();
        }
        if let Some(value) = self.sheet_value(property) {
            return value;
        }
        match property {
            "position" => "static",
            "visibility" | "overflow-x" | "overflow-y" => "visible",
            "display" => "block",
            "transform" => "none",
            p if p.starts_with("margin-") => "0px",
            _ => "auto",
        }
        .to_string()
    }

    fn sheet_value(&self, property: &str) -> Option<String> {
        if let Some(value) = self.sheet.get(property) {
            return Some(value.clone());
        }
        SHORTHANDS.iter().find_map(|shorthand| {
            let longhands = longhands(shorthand)?;
            let value = self.sheet.get(*shorthand)?;
            expand(longhands, value)
                .into_iter()
                .find(|(longhand, _)| longhand == property)
                .map(|(_, v)| v)
        })
    }

    /// Inline declaration as `style.getPropertyValue` and
    /// `getPropertyPriority` report it. A shorthand is only reported when
    /// every longhand is inline with the same priority.
    pub fn declaration(&self, property: &str) -> Option<InlineValue> {
        let Some(longhands) = longhands(property) else {
            return self.inline.get(property).cloned();
        };
        let parts: Option<Vec<&InlineValue>> =
            longhands.iter().map(|l| self.inline.get(*l)).collect();
        let parts = parts?;
        let important = parts[0].important;
        if parts.iter().any(|p| p.important != important) {
            return None;
        }
        Some(InlineValue {
            value: collapse(parts.iter().map(|p| p.value.clone()).collect()),
            important,
        })
    }

    /// Inline declaration text, `None` when the property is not inline.
    /// A shorthand reads as its longhands' common value.
    pub fn inline_value(&self, property: &str) -> Option<&str> {
        let Some(longhands) = longhands(property) else {
            return self.inline.get(property).map(|v| v.value.as_str());
        };
        let first = self.inline.get(longhands[0])?;
        let uniform = longhands[1..].iter().all(|l| {
            self.inline
                .get(*l)
                .is_some_and(|v| v.value == first.value && v.important == first.important)
        });
        uniform.then_some(first.value.as_str())
    }

    fn paints(&self) -> bool {
        self.computed("visibility") != "hidden" && self.computed("display") != "none"
    }

    fn write(&mut self, op: &StyleOp) {
        match &op.action {
            StyleAction::Set { value, important } => {
                let values = match longhands(&op.property) {
                    Some(longhands) => expand(longhands, value),
                    None => vec![(op.property.clone(), value.clone())],
                };
                for (property, value) in values {
                    self.inline.insert(
                        property,
                        InlineValue {
                            value,
                            important: *important,
                        },
                    );
                }
            }
            StyleAction::Remove => match longhands(&op.property) {
                Some(longhands) => {
                    for longhand in longhands {
                        self.inline.remove(*longhand);
                    }
                }
                None => {
                    self.inline.remove(&op.property);
                }
            },
        }
    }
}

fn declare(property: &str, value: &str, important: bool) -> StyleOp {
    StyleOp {
        target: StyleTarget::Body,
        property: property.to_string(),
        action: StyleAction::Set {
            value: value.to_string(),
            important,
        },
    }
}

#[derive(Debug)]
pub struct PageState {
    pub url: String,
    pub root: Node,
    pub body: Node,
    pub elements: Vec<Node>,
    pub handles: Vec<usize>,
    pub full_height: u32,
    pub viewport_height: u32,
    pub scale: u32,
    pub scroll_limit: Option<u32>,
    pub scroll: u32,
    pub body_offset: Point,
    pub stylesheets: BTreeMap<String, String>,
    pub timers: BTreeMap<String, Vec<StyleOp>>,
    pub throttle_next: u32,
    pub fail_capture_at: Option<usize>,
    pub fail_scroll_to: Option<u32>,
    pub capture_attempts: usize,
    pub fail_apply_at: Option<usize>,
    pub apply_calls: usize,
    pub loaded: bool,
    pub calls: Vec<String>,
    pub captures: Vec<u32>,
}

/// Fake browser tab
pub struct FakePage {
    id: SurfaceId,
    pub state: Mutex<PageState>,
}

impl FakePage {
    /// A `full_height` page with a `viewport_height` viewport
    pub fn new(full_height: u32, viewport_height: u32) -> Self {
        Self {
            id: SurfaceId::from("fake-tab"),
            state: Mutex::new(PageState {
                url: "https://example.com/article".to_string(),
                root: Node::new("html"),
                body: Node::new("body"),
                elements: Vec::new(),
                handles: Vec::new(),
                full_height,
                viewport_height,
                scale: 1,
                scroll_limit: None,
                scroll: 0,
                body_offset: Point::default(),
                stylesheets: BTreeMap::new(),
                timers: BTreeMap::new(),
                throttle_next: 0,
                fail_capture_at: None,
                fail_scroll_to: None,
                capture_attempts: 0,
                fail_apply_at: None,
                apply_calls: 0,
                loaded: true,
                calls: Vec::new(),
                captures: Vec::new(),
            }),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = SurfaceId::from(id);
        self
    }

    pub fn with_url(self, url: &str) -> Self {
        self.state.lock().url = url.to_string();
        self
    }

    /// Scrolling stops at `max` even though the page reports more height
    pub fn with_scroll_limit(self, max: u32) -> Self {
        self.state.lock().scroll_limit = Some(max);
        self
    }

    /// Rasters are `scale` device pixels per CSS pixel
    pub fn with_scale(self, scale: u32) -> Self {
        self.state.lock().scale = scale;
        self
    }

    /// Body border box starts at this document offset (its margin)
    pub fn with_body_offset(self, top: f64, left: f64) -> Self {
        self.state.lock().body_offset = Point { top, left };
        self
    }

    /// Add an element positioned by the stylesheet; returns its index
    pub fn add_element(&self, tag: &str, position: &str, top: f64, height: f64) -> usize {
        let mut node = Node::new(tag);
        node.sheet.insert("position".to_string(), position.to_string());
        node.rect = Rect {
            top,
            left: 0.0,
            width: f64::from(RASTER_WIDTH),
            height,
        };
        let mut state = self.state.lock();
        state.elements.push(node);
        state.elements.len() - 1
    }

    /// Give an element an inline declaration
    pub fn set_inline(&self, index: usize, property: &str, value: &str, important: bool) {
        self.state.lock().elements[index].write(&declare(property, value, important));
    }

    /// Give `body` an inline declaration
    pub fn set_body_inline(&self, property: &str, value: &str, important: bool) {
        self.state.lock().body.write(&declare(property, value, important));
    }

    /// Throttle the next `count` captures
    pub fn throttle_next(&self, count: u32) {
        self.state.lock().throttle_next = count;
    }

    /// Fail the `n`th (1-based) capture attempt with a screenshot error
    pub fn fail_capture_at(&self, n: usize) {
        self.state.lock().fail_capture_at = Some(n);
    }

    /// Fail every scroll request to `offset`
    pub fn fail_scroll_to(&self, offset: u32) {
        self.state.lock().fail_scroll_to = Some(offset);
    }

    /// Every `capture_viewport` call, including failed ones
    pub fn capture_attempts(&self) -> usize {
        self.state.lock().capture_attempts
    }

    /// Fail the `n`th (1-based) `apply_styles` call
    pub fn fail_apply_at(&self, n: usize) {
        self.state.lock().fail_apply_at = Some(n);
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.state.lock().loaded = loaded;
    }

    /// Run every pending revert timer now
    pub fn fire_timers(&self) {
        let mut state = self.state.lock();
        let timers = std::mem::take(&mut state.timers);
        for ops in timers.values() {
            for op in ops {
                state.write(op);
            }
        }
    }

    pub fn element(&self, index: usize) -> Node {
        self.state.lock().elements[index].clone()
    }

    pub fn body(&self) -> Node {
        self.state.lock().body.clone()
    }

    pub fn root(&self) -> Node {
        self.state.lock().root.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn captures(&self) -> Vec<u32> {
        self.state.lock().captures.clone()
    }

    pub fn has_stylesheet(&self, id: &str) -> bool {
        self.state.lock().stylesheets.contains_key(id)
    }

    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Whether any node carries an inline style
    pub fn has_inline_styles(&self) -> bool {
        let state = self.state.lock();
        !state.root.inline.is_empty()
            || !state.body.inline.is_empty()
            || state.elements.iter().any(|e| !e.inline.is_empty())
    }
}

impl PageState {
    fn node_mut(&mut self, target: StyleTarget) -> Option<&mut Node> {
        match target {
            StyleTarget::Root => Some(&mut self.root),
            StyleTarget::Body => Some(&mut self.body),
            StyleTarget::Element(ElementId(id)) => {
                let index = *self.handles.get(id as usize)?;
                self.elements.get_mut(index)
            }
        }
    }

    fn node(&self, target: StyleTarget) -> Option<&Node> {
        match target {
            StyleTarget::Root => Some(&self.root),
            StyleTarget::Body => Some(&self.body),
            StyleTarget::Element(ElementId(id)) => {
                let index = *self.handles.get(id as usize)?;
                self.elements.get(index)
            }
        }
    }

    fn write(&mut self, op: &StyleOp) {
        if let Some(node) = self.node_mut(op.target) {
            node.write(op);
        }
    }

    fn handle_for(&mut self, index: usize) -> ElementId {
        let id = match self.handles.iter().position(|&i| i == index) {
            Some(id) => id,
            None => {
                self.handles.push(index);
                self.handles.len() - 1
            }
        };
        ElementId(id as u32)
    }

    fn max_scroll(&self) -> u32 {
        self.scroll_limit
            .unwrap_or(self.full_height.saturating_sub(self.viewport_height))
    }

    /// Whether an element covers document row `doc_y` at the current scroll
    fn overlay_at(&self, doc_y: u32) -> bool {
        let doc_y = f64::from(doc_y);
        self.elements.iter().any(|node| {
            if !node.paints() {
                return false;
            }
            let top = match node.computed("position").as_str() {
                "fixed" => node.rect.top + f64::from(self.scroll),
                "absolute" => {
                    self.body_offset.top
                        + node
                            .inline_value("top")
                            .and_then(|v| v.trim_end_matches("px").parse::<f64>().ok())
                            .unwrap_or(node.rect.top)
                }
                _ => return false,
            };
            doc_y >= top && doc_y < top + node.rect.height
        })
    }

    fn raster(&self) -> RgbaImage {
        let height = self.viewport_height * self.scale;
        RgbaImage::from_fn(RASTER_WIDTH, height, |_, y| {
            let doc_y = self.scroll + y / self.scale;
            let overlay = if self.overlay_at(doc_y) { 255 } else { 0 };
            Rgba([(doc_y & 0xff) as u8, (doc_y >> 8) as u8, overlay, 255])
        })
    }
}

/// Document row shown by a raster pixel
pub fn doc_row(pixel: &Rgba<u8>) -> u32 {
    u32::from(pixel[0]) | (u32::from(pixel[1]) << 8)
}

/// Whether a raster pixel shows a positioned overlay
pub fn is_overlay(pixel: &Rgba<u8>) -> bool {
    pixel[2] == 255
}

#[async_trait]
impl Surface for FakePage {
    fn id(&self) -> SurfaceId {
        self.id.clone()
    }

    async fn url(&self) -> Result<String> {
        Ok(self.state.lock().url.clone())
    }

    async fn dimensions(&self) -> Result<PageDimensions> {
        let state = self.state.lock();
        Ok(PageDimensions {
            full_height: state.full_height,
            viewport_height: state.viewport_height,
            viewport_width: RASTER_WIDTH,
        })
    }

    async fn scroll_to(&self, offset: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("scroll_to:{}", offset));
        if state.fail_scroll_to == Some(offset) {
            return Err(Error::cdp("scroll target detached"));
        }
        state.scroll = offset.min(state.max_scroll());
        Ok(())
    }

    async fn scroll_offset(&self) -> Result<u32> {
        Ok(self.state.lock().scroll)
    }

    async fn query(&self, query: &ElementQuery) -> Result<Vec<ElementInfo>> {
        let mut state = self.state.lock();
        state.calls.push("query".to_string());

        let matches: Vec<usize> = state
            .elements
            .iter()
            .enumerate()
            .filter(|(_, node)| match query {
                ElementQuery::Positioned { positions } => {
                    let position = node.computed("position");
                    positions.iter().any(|p| match p {
                        Position::Fixed => position == "fixed",
                        Position::Sticky => position == "sticky",
                    })
                }
                ElementQuery::Selector { selector } => {
                    selector.split(',').any(|s| s.trim() == node.tag)
                }
            })
            .map(|(index, _)| index)
            .collect();

        Ok(matches
            .into_iter()
            .map(|index| {
                let id = state.handle_for(index);
                let node = &state.elements[index];
                let position = node.computed("position");
                // body becomes the containing block once it is made relative
                let container = (position == "fixed").then(|| Point {
                    top: state.body_offset.top - f64::from(state.scroll),
                    left: state.body_offset.left,
                });
                ElementInfo {
                    id,
                    position,
                    rect: node.rect,
                    container,
                }
            })
            .collect())
    }

    async fn read_styles(
        &self,
        target: StyleTarget,
        properties: &[&str],
    ) -> Result<Vec<SavedProperty>> {
        let state = self.state.lock();
        let node = state
            .node(target)
            .ok_or_else(|| Error::generic(format!("unknown target {:?}", target)))?;
        Ok(properties
            .iter()
            .map(|property| SavedProperty {
                property: property.to_string(),
                computed: node.computed(property),
                inline: node.declaration(property),
            })
            .collect())
    }

    async fn apply_styles(&self, ops: &[StyleOp]) -> Result<()> {
        let mut state = self.state.lock();
        state.apply_calls += 1;
        let call = state.apply_calls;
        state.calls.push(format!("apply:{}", call));
        if state.fail_apply_at == Some(call) {
            return Err(Error::generic("style write rejected"));
        }
        for op in ops {
            state.write(op);
        }
        Ok(())
    }

    async fn schedule_revert(&self, key: &str, ops: &[StyleOp], _delay: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("schedule_revert".to_string());
        state.timers.insert(key.to_string(), ops.to_vec());
        Ok(())
    }

    async fn cancel_revert(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("cancel_revert".to_string());
        state.timers.remove(key);
        Ok(())
    }

    async fn release_elements(&self) -> Result<()> {
        self.state.lock().handles.clear();
        Ok(())
    }

    async fn insert_stylesheet(&self, id: &str, css: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("insert_stylesheet:{}", id));
        state
            .stylesheets
            .entry(id.to_string())
            .or_insert_with(|| css.to_string());
        Ok(())
    }

    async fn remove_stylesheet(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_stylesheet:{}", id));
        state.stylesheets.remove(id);
        Ok(())
    }

    async fn wait_loaded(&self) -> Result<bool> {
        let loaded = self.state.lock().loaded;
        if !loaded {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(loaded)
    }

    async fn capture_viewport(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let scroll = state.scroll;
        state.calls.push(format!("capture@{}", scroll));
        state.capture_attempts += 1;

        if state.fail_capture_at == Some(state.capture_attempts) {
            return Err(CaptureError::ScreenshotFailed("gpu process lost".to_string()).into());
        }

        if state.throttle_next > 0 {
            state.throttle_next -= 1;
            return Err(CaptureError::Throttled("too many captures".to_string()).into());
        }

        state.captures.push(scroll);
        let mut png = Vec::new();
        state
            .raster()
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| Error::generic(e.to_string()))?;
        Ok(png)
    }
}
