//! Band stitching
//!
//! Composes the ordered viewport captures of one session into a single
//! full-page image.
//!
//! ```text
//!   band 0  ──▶ y = 0
//!   band 1  ──▶ y = vh
//!   ...
//!   band n  ──▶ y = n·vh, only its bottom (fullHeight − n·vh) rows
//! ```
//!
//! The last scroll step usually moves less than a full viewport, so the
//! last band overlaps the previous one; only its bottom rows are new.

use crate::error::StitchError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::png::PngEncoder;
use image::{imageops, ExtendedColorType, ImageEncoder, RgbaImage};
use std::fmt;

/// One viewport-height capture at a known scroll offset
#[derive(Clone)]
pub struct RasterBand {
    index: usize,
    offset: u32,
    image: RgbaImage,
}

impl RasterBand {
    /// Wrap an already decoded image
    pub fn new(index: usize, offset: u32, image: RgbaImage) -> Self {
        Self {
            index,
            offset,
            image,
        }
    }

    /// Decode a captured PNG
    pub fn decode(index: usize, offset: u32, bytes: &[u8]) -> Result<Self, StitchError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| StitchError::Decode {
                index,
                message: e.to_string(),
            })?
            .to_rgba8();
        Ok(Self::new(index, offset, image))
    }

    /// Position in capture order
    pub fn index(&self) -> usize {
        self.index
    }

    /// Scroll offset the band was captured at
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Decoded pixels
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for RasterBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBand")
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Final stitched image
#[derive(Clone, PartialEq)]
pub struct CompositeImage {
    image: RgbaImage,
}

impl CompositeImage {
    /// Wrap decoded pixels
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Decode a PNG
    pub fn from_png(bytes: &[u8]) -> Result<Self, StitchError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| StitchError::Decode {
                index: 0,
                message: e.to_string(),
            })?
            .to_rgba8();
        Ok(Self::new(image))
    }

    /// Pixels
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode as PNG
    pub fn to_png(&self) -> Result<Vec<u8>, StitchError> {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf).write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            ExtendedColorType::Rgba8,
        )?;
        Ok(buf)
    }

    /// Encode as a `data:image/png;base64,` URL
    pub fn to_data_url(&self) -> Result<String, StitchError> {
        Ok(format!("data:image/png;base64,{}", BASE64.encode(self.to_png()?)))
    }
}

impl fmt::Debug for CompositeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Band compositor
pub struct Stitcher;

impl Stitcher {
    /// Compose `bands` into a `first.width × full_height` image.
    ///
    /// All heights are in band pixels.
    pub fn compose(
        bands: &[RasterBand],
        full_height: u32,
        viewport_height: u32,
    ) -> Result<CompositeImage, StitchError> {
        let first = bands.first().ok_or(StitchError::NoBands)?;
        let width = first.width();
        if width == 0 || full_height == 0 || viewport_height == 0 {
            return Err(StitchError::InvalidDimensions {
                width,
                height: full_height,
            });
        }

        let mut canvas = RgbaImage::new(width, full_height);
        let (last, body) = bands.split_last().ok_or(StitchError::NoBands)?;

        let mut y: u32 = 0;
        for band in body {
            if y >= full_height {
                break;
            }
            let rows = viewport_height.min(band.height()).min(full_height - y);
            let slice = imageops::crop_imm(band.image(), 0, 0, band.width(), rows);
            imageops::replace(&mut canvas, &*slice, 0, i64::from(y));
            y = y.saturating_add(viewport_height);
        }

        if y < full_height {
            let remaining = full_height - y;
            let rows = remaining.min(last.height());
            let top = last.height() - rows;
            let slice = imageops::crop_imm(last.image(), 0, top, last.width(), rows);
            imageops::replace(&mut canvas, &*slice, 0, i64::from(y));
        }

        Ok(CompositeImage::new(canvas))
    }
}
