//! CDP-backed capture surface
//!
//! Implements [`Surface`] for a Chromium tab. Each primitive is a small
//! script evaluated in the page; element handles and revert timers live in
//! a `window.__fullshot` registry so they survive between evaluations.

use crate::browser::navigation::CaptureThrottle;
use crate::browser::PageHandle;
use crate::error::{CaptureError, Result};
use crate::page::{
    ElementInfo, ElementQuery, PageDimensions, SavedProperty, StyleOp, StyleTarget, Surface,
    SurfaceId,
};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Shared helpers prepended to every script
const PRELUDE: &str = r#"
    const fs = window.__fullshot || (window.__fullshot = { elements: [], timers: {} });
    const resolve = (t) => t.kind === 'root'
        ? document.documentElement
        : t.kind === 'body' ? document.body : fs.elements[t.id];
    const write = (el, op) => {
        if (!el) return;
        if (op.action.type === 'set') {
            el.style.setProperty(op.property, op.action.value, op.action.important ? 'important' : '');
        } else {
            el.style.removeProperty(op.property);
        }
    };
"#;

const QUERY: &str = r#"
    const container = (el) => {
        let node = el.parentElement;
        while (node && node !== document.body && node !== document.documentElement) {
            if (getComputedStyle(node).position !== 'static') break;
            node = node.parentElement;
        }
        if (!node || node === document.documentElement) return null;
        const c = node.getBoundingClientRect();
        return { top: c.top + node.clientTop, left: c.left + node.clientLeft };
    };
    const nodes = args.kind === 'selector'
        ? document.querySelectorAll(args.selector)
        : document.querySelectorAll('body *');
    const out = [];
    for (const el of nodes) {
        const position = getComputedStyle(el).position;
        if (args.kind === 'positioned' && !args.positions.includes(position)) continue;
        let id = fs.elements.indexOf(el);
        if (id < 0) {
            id = fs.elements.length;
            fs.elements.push(el);
        }
        const r = el.getBoundingClientRect();
        out.push({
            id,
            position,
            rect: { top: r.top, left: r.left, width: r.width, height: r.height },
            container: position === 'fixed' ? container(el) : null,
        });
    }
    return out;
"#;

const READ_STYLES: &str = r#"
    const el = resolve(args.target);
    if (!el) throw new Error('unknown style target ' + JSON.stringify(args.target));
    const computed = getComputedStyle(el);
    return args.properties.map(property => {
        const value = el.style.getPropertyValue(property);
        return {
            property,
            computed: computed.getPropertyValue(property),
            inline: value
                ? { value, important: el.style.getPropertyPriority(property) === 'important' }
                : null,
        };
    });
"#;

const APPLY_STYLES: &str = r#"
    for (const op of args.ops) write(resolve(op.target), op);
    return true;
"#;

const SCHEDULE_REVERT: &str = r#"
    clearTimeout(fs.timers[args.key]);
    const pending = args.ops.map(op => [resolve(op.target), op]);
    fs.timers[args.key] = setTimeout(() => {
        delete fs.timers[args.key];
        for (const [el, op] of pending) write(el, op);
    }, args.delay);
    return true;
"#;

const CANCEL_REVERT: &str = r#"
    clearTimeout(fs.timers[args.key]);
    delete fs.timers[args.key];
    return true;
"#;

const RELEASE_ELEMENTS: &str = r#"
    fs.elements = [];
    return true;
"#;

const INSERT_STYLESHEET: &str = r#"
    if (!document.getElementById(args.id)) {
        const style = document.createElement('style');
        style.id = args.id;
        style.textContent = args.css;
        (document.head || document.documentElement).appendChild(style);
    }
    return true;
"#;

const REMOVE_STYLESHEET: &str = r#"
    const style = document.getElementById(args.id);
    if (style) style.remove();
    return true;
"#;

const DIMENSIONS: &str = r#"
    return {
        fullHeight: Math.max(
            document.documentElement.scrollHeight,
            document.body ? document.body.scrollHeight : 0
        ),
        viewportHeight: window.innerHeight,
        viewportWidth: window.innerWidth,
    };
"#;

const SCROLL_TO: &str = r#"
    window.scrollTo({ top: args.offset, left: 0, behavior: 'instant' });
    return true;
"#;

const SCROLL_OFFSET: &str = r#"
    return Math.round(window.scrollY);
"#;

const WAIT_LOADED: &str = r#"
    return new Promise(done => {
        const images = () => {
            const pending = Array.from(document.images).filter(img => !img.complete);
            if (pending.length === 0) return done(true);
            let left = pending.length;
            const settle = () => { if (--left === 0) done(true); };
            for (const img of pending) {
                img.addEventListener('load', settle, { once: true });
                img.addEventListener('error', settle, { once: true });
            }
        };
        if (document.readyState === 'complete') images();
        else window.addEventListener('load', images, { once: true });
    });
"#;

/// Wrap `body` in an IIFE with the prelude and `args` bound
fn script(body: &str, args: &impl Serialize) -> Result<String> {
    Ok(format!(
        "(() => {{\n{}\nconst args = {};\n{}\n}})()",
        PRELUDE,
        serde_json::to_string(args)?,
        body
    ))
}

/// A Chromium tab driven over CDP
#[derive(Clone)]
pub struct CdpSurface {
    handle: PageHandle,
    id: SurfaceId,
    throttle: Arc<CaptureThrottle>,
}

impl CdpSurface {
    /// Wrap an open page
    pub fn new(handle: PageHandle, throttle: Arc<CaptureThrottle>) -> Self {
        let id = SurfaceId::from(handle.page.target_id().inner().clone());
        Self {
            handle,
            id,
            throttle,
        }
    }

    async fn eval<T: DeserializeOwned>(&self, body: &str, args: impl Serialize) -> Result<T> {
        let source = script(body, &args)?;
        Ok(self
            .handle
            .page
            .evaluate(source.as_str())
            .await?
            .into_value::<T>()?)
    }

    async fn exec(&self, body: &str, args: impl Serialize) -> Result<()> {
        let _: bool = self.eval(body, args).await?;
        Ok(())
    }
}

#[async_trait]
impl Surface for CdpSurface {
    fn id(&self) -> SurfaceId {
        self.id.clone()
    }

    async fn url(&self) -> Result<String> {
        match self.handle.page.url().await? {
            Some(url) => Ok(url),
            None => Ok(self.handle.url().await),
        }
    }

    async fn dimensions(&self) -> Result<PageDimensions> {
        self.eval(DIMENSIONS, json!({})).await
    }

    async fn scroll_to(&self, offset: u32) -> Result<()> {
        self.exec(SCROLL_TO, json!({ "offset": offset })).await
    }

    async fn scroll_offset(&self) -> Result<u32> {
        self.eval(SCROLL_OFFSET, json!({})).await
    }

    async fn query(&self, query: &ElementQuery) -> Result<Vec<ElementInfo>> {
        let found: Vec<ElementInfo> = self.eval(QUERY, query).await?;
        debug!("Query {:?} matched {} elements", query, found.len());
        Ok(found)
    }

    async fn read_styles(
        &self,
        target: StyleTarget,
        properties: &[&str],
    ) -> Result<Vec<SavedProperty>> {
        self.eval(
            READ_STYLES,
            json!({ "target": target, "properties": properties }),
        )
        .await
    }

    async fn apply_styles(&self, ops: &[StyleOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.exec(APPLY_STYLES, json!({ "ops": ops })).await
    }

    async fn schedule_revert(&self, key: &str, ops: &[StyleOp], delay: Duration) -> Result<()> {
        self.exec(
            SCHEDULE_REVERT,
            json!({ "key": key, "ops": ops, "delay": delay.as_millis() as u64 }),
        )
        .await
    }

    async fn cancel_revert(&self, key: &str) -> Result<()> {
        self.exec(CANCEL_REVERT, json!({ "key": key })).await
    }

    async fn release_elements(&self) -> Result<()> {
        self.exec(RELEASE_ELEMENTS, json!({})).await
    }

    async fn insert_stylesheet(&self, id: &str, css: &str) -> Result<()> {
        self.exec(INSERT_STYLESHEET, json!({ "id": id, "css": css }))
            .await
    }

    async fn remove_stylesheet(&self, id: &str) -> Result<()> {
        self.exec(REMOVE_STYLESHEET, json!({ "id": id })).await
    }

    async fn wait_loaded(&self) -> Result<bool> {
        self.eval(WAIT_LOADED, json!({})).await
    }

    #[instrument(skip(self), fields(surface = %self.id))]
    async fn capture_viewport(&self) -> Result<Vec<u8>> {
        if !self.throttle.check() {
            return Err(CaptureError::Throttled(format!(
                "capture quota exhausted, window resets in {:?}",
                self.throttle.retry_after()
            ))
            .into());
        }

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .from_surface(true)
            .build();

        let data = self
            .handle
            .page
            .screenshot(params)
            .await
            .map_err(|e| CaptureError::ScreenshotFailed(e.to_string()))?;

        debug!("Viewport captured: {} bytes", data.len());
        Ok(data)
    }
}
