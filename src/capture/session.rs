//! Capture sessions and per-surface exclusivity

use crate::page::SurfaceId;
use crate::stitch::RasterBand;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// State of one full-page capture, owned by the driver
#[derive(Debug)]
pub struct CaptureSession {
    /// Session id, also used as the in-page timer key
    pub id: Uuid,
    /// Surface being captured
    pub surface: SurfaceId,
    /// Page full height in CSS pixels
    pub full_height: u32,
    /// Viewport height in CSS pixels
    pub viewport_height: u32,
    /// Last observed scroll offset
    pub scroll_offset: u32,
    /// Captured bands in order
    pub bands: Vec<RasterBand>,
    progress: u8,
    progress_tx: Option<watch::Sender<u8>>,
}

impl CaptureSession {
    /// Start a session for `surface`
    pub fn new(surface: SurfaceId, progress_tx: Option<watch::Sender<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            surface,
            full_height: 0,
            viewport_height: 0,
            scroll_offset: 0,
            bands: Vec::new(),
            progress: 0,
            progress_tx,
        }
    }

    /// Progress percentage (0-100)
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Set progress from the current target offset and publish it
    pub fn update_progress(&mut self, target_offset: u32) {
        self.set_progress(progress_for(target_offset, self.full_height));
    }

    /// Set progress directly and publish it
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(self.progress);
        }
    }
}

/// `min(100, round(target / full × 100))`
pub fn progress_for(target_offset: u32, full_height: u32) -> u8 {
    if full_height == 0 {
        return 100;
    }
    let percent = (f64::from(target_offset) / f64::from(full_height) * 100.0).round();
    percent.min(100.0) as u8
}

/// Serializes capture sessions per surface.
///
/// A second request for a surface waits until the first session's guard
/// is dropped.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    locks: Mutex<HashMap<SurfaceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `surface`
    pub async fn acquire(&self, surface: &SurfaceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(surface.clone()).or_default())
        };
        if lock.try_lock().is_err() {
            debug!("Surface {} busy, waiting for the active session", surface);
        }
        lock.lock_owned().await
    }

    /// Whether a session currently holds `surface`
    pub fn is_active(&self, surface: &SurfaceId) -> bool {
        self.locks
            .lock()
            .get(surface)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
