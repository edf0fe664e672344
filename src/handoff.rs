//! Single-slot handoff store
//!
//! Passes the finished composite from the capture driver to the viewer.
//! The slot holds at most one entry; each capture overwrites it and the
//! viewer takes it exactly once.
//!
//! A store opened with [`HandoffStore::at_dir`] mirrors the slot to
//! `currentScreenshot.png` plus `currentScreenshot.json`, so a separate
//! viewer process can pick it up.

use crate::error::{HandoffError, Result};
use crate::stitch::CompositeImage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Fixed name of the handoff slot
pub const HANDOFF_KEY: &str = "currentScreenshot";

/// Metadata stored next to the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffMeta {
    /// Capture session that produced the image
    pub session: Uuid,
    /// URL of the captured page
    pub source_url: String,
    /// When the image was stored
    pub captured_at: DateTime<Utc>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

/// Contents of the slot
#[derive(Debug, Clone)]
pub struct HandoffEntry {
    /// Metadata
    pub meta: HandoffMeta,
    /// The composite
    pub image: CompositeImage,
}

impl HandoffEntry {
    /// Build an entry stamped with the current time
    pub fn new(session: Uuid, source_url: impl Into<String>, image: CompositeImage) -> Self {
        Self {
            meta: HandoffMeta {
                session,
                source_url: source_url.into(),
                captured_at: Utc::now(),
                width: image.width(),
                height: image.height(),
            },
            image,
        }
    }
}

/// Single-writer, single-reader slot
#[derive(Debug, Default)]
pub struct HandoffStore {
    slot: Mutex<Option<HandoffEntry>>,
    dir: Option<PathBuf>,
}

impl HandoffStore {
    /// In-memory store
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store mirrored to `dir`, created if missing
    pub fn at_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            slot: Mutex::new(None),
            dir: Some(dir),
        })
    }

    /// Backing directory, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Write `entry`, replacing whatever the slot held
    #[instrument(skip(self, entry), fields(session = %entry.meta.session))]
    pub fn put(&self, entry: HandoffEntry) -> Result<()> {
        if let Some(dir) = &self.dir {
            let png = entry.image.to_png()?;
            std::fs::write(image_path(dir), png)?;
            std::fs::write(meta_path(dir), serde_json::to_vec_pretty(&entry.meta)?)?;
            debug!("Mirrored handoff slot to {}", dir.display());
        }

        info!(
            "Stored {}x{} screenshot in {}",
            entry.meta.width, entry.meta.height, HANDOFF_KEY
        );
        *self.slot.lock() = Some(entry);
        Ok(())
    }

    /// Whether the slot holds an entry
    pub fn is_occupied(&self) -> bool {
        if self.slot.lock().is_some() {
            return true;
        }
        self.dir
            .as_deref()
            .map(|dir| meta_path(dir).exists())
            .unwrap_or(false)
    }

    /// Read the slot once, leaving it free for the next capture
    #[instrument(skip(self))]
    pub fn take(&self) -> Result<Option<HandoffEntry>> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            // the entry stays in the slot if its files cannot be cleared
            if let Some(dir) = &self.dir {
                remove_files(dir)?;
            }
            return Ok(slot.take());
        }

        match &self.dir {
            Some(dir) => {
                let entry = load_from(dir)?;
                if entry.is_some() {
                    remove_files(dir)?;
                }
                Ok(entry)
            }
            None => Ok(None),
        }
    }
}

fn image_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.png", HANDOFF_KEY))
}

fn meta_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.json", HANDOFF_KEY))
}

fn load_from(dir: &Path) -> Result<Option<HandoffEntry>> {
    let meta_file = meta_path(dir);
    if !meta_file.exists() {
        return Ok(None);
    }

    let meta: HandoffMeta = serde_json::from_slice(&std::fs::read(&meta_file)?)
        .map_err(|e| HandoffError::Corrupt(e.to_string()))?;
    let png = std::fs::read(image_path(dir))
        .map_err(|e| HandoffError::Corrupt(format!("missing image: {}", e)))?;
    let image =
        CompositeImage::from_png(&png).map_err(|e| HandoffError::Corrupt(e.to_string()))?;

    Ok(Some(HandoffEntry { meta, image }))
}

fn remove_files(dir: &Path) -> Result<()> {
    for path in [meta_path(dir), image_path(dir)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
