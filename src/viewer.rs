//! Screenshot viewer
//!
//! A small local HTTP page showing the composite taken from the handoff
//! slot. The slot is read once, when the viewer is loaded; every request is
//! served from that copy.
//!
//! # Routes
//! - `GET /` - HTML page embedding the image
//! - `GET /screenshot.png` - the image itself, `404` when nothing was captured
//! - `GET /metrics` - capture metrics in Prometheus text format

use crate::error::Result;
use crate::handoff::{HandoffMeta, HandoffStore};
use crate::metrics::global_metrics;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Image loaded from the handoff slot
#[derive(Debug)]
struct LoadedImage {
    meta: HandoffMeta,
    png: Vec<u8>,
}

#[derive(Debug, Default)]
struct ViewerState {
    image: Option<LoadedImage>,
}

/// Screenshot viewer
#[derive(Debug, Clone)]
pub struct Viewer {
    state: Arc<ViewerState>,
}

impl Viewer {
    /// Take the slot's entry, if any, and build a viewer around it
    #[instrument(skip(store))]
    pub fn load(store: &HandoffStore) -> Result<Self> {
        let image = match store.take()? {
            Some(entry) => {
                info!(
                    "Loaded {}x{} screenshot of {}",
                    entry.meta.width, entry.meta.height, entry.meta.source_url
                );
                Some(LoadedImage {
                    png: entry.image.to_png()?,
                    meta: entry.meta,
                })
            }
            None => {
                info!("Handoff slot is empty");
                None
            }
        };

        Ok(Self {
            state: Arc::new(ViewerState { image }),
        })
    }

    /// Whether the viewer has an image to show
    pub fn has_image(&self) -> bool {
        self.state.image.is_some()
    }

    /// Metadata of the loaded image
    pub fn meta(&self) -> Option<&HandoffMeta> {
        self.state.image.as_ref().map(|image| &image.meta)
    }

    /// Router serving the viewer routes
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            .route("/screenshot.png", get(image_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until the process is stopped
    #[instrument(skip(self))]
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Viewer listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn index_handler(State(state): State<Arc<ViewerState>>) -> Html<String> {
    debug!("Viewer page requested");
    Html(render_page(state.image.as_ref().map(|image| &image.meta)))
}

async fn image_handler(State(state): State<Arc<ViewerState>>) -> Response {
    match &state.image {
        Some(image) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            image.png.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "No screenshot captured").into_response(),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        global_metrics().to_prometheus_format(),
    )
}

fn render_page(meta: Option<&HandoffMeta>) -> String {
    let body = match meta {
        Some(meta) => format!(
            r#"<header>
      <a href="{url}">{url}</a>
      <span>{width} &times; {height} px, captured {captured}</span>
      <a class="download" href="/screenshot.png" download="screenshot.png">Download</a>
    </header>
    <main><img src="/screenshot.png" alt="Screenshot of {url}"></main>"#,
            url = htmlescape::encode_minimal(&meta.source_url),
            width = meta.width,
            height = meta.height,
            captured = meta.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ),
        None => r#"<main class="empty">No screenshot was captured.</main>"#.to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Screenshot</title>
    <style>
      body {{ margin: 0; font-family: system-ui, sans-serif; background: #f3f3f3; }}
      header {{ display: flex; gap: 1rem; align-items: center; padding: .75rem 1rem; background: #fff; border-bottom: 1px solid #ddd; }}
      header span {{ color: #666; }}
      .download {{ margin-left: auto; }}
      main {{ padding: 1rem; text-align: center; }}
      main img {{ max-width: 100%; box-shadow: 0 1px 4px rgba(0, 0, 0, .2); }}
      .empty {{ color: #666; padding-top: 4rem; }}
    </style>
  </head>
  <body>
    {}
  </body>
</html>
"#,
        body
    )
}
