//! Scroll controller
//!
//! Reports page height and scroll offset, moves the scroll position, and
//! waits for layout to settle after each jump.

use crate::error::{Result, ScrollError};
use crate::page::{PageDimensions, Surface};
use std::time::Duration;
use tracing::{debug, instrument};

/// How to wait for layout after a scroll or style change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Sleep for a fixed delay
    Fixed(Duration),
    /// Poll scroll offset and page height until `stable_reads` consecutive
    /// readings agree, giving up after `timeout`
    Poll {
        /// Delay between readings
        interval: Duration,
        /// Consecutive equal readings required
        stable_reads: u32,
        /// Upper bound on the wait
        timeout: Duration,
    },
}

impl Default for Settle {
    fn default() -> Self {
        Settle::Fixed(Duration::from_millis(100))
    }
}

impl Settle {
    /// Polling settle with defaults suited to slow pages
    pub fn poll() -> Self {
        Settle::Poll {
            interval: Duration::from_millis(50),
            stable_reads: 3,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Scroll controller bound to one surface
pub struct ScrollController<'a, S: Surface + ?Sized> {
    surface: &'a S,
}

impl<'a, S: Surface + ?Sized> ScrollController<'a, S> {
    /// Create a controller for `surface`
    pub fn new(surface: &'a S) -> Self {
        Self { surface }
    }

    /// Page and viewport dimensions
    pub async fn dimensions(&self) -> Result<PageDimensions> {
        self.surface
            .dimensions()
            .await
            .map_err(|e| ScrollError::MetricsFailed(e.to_string()).into())
    }

    /// Max of document-element and body scroll height
    pub async fn full_height(&self) -> Result<u32> {
        Ok(self.dimensions().await?.full_height)
    }

    /// Height of the visible viewport
    pub async fn viewport_height(&self) -> Result<u32> {
        let height = self.dimensions().await?.viewport_height;
        if height == 0 {
            return Err(ScrollError::EmptyViewport.into());
        }
        Ok(height)
    }

    /// Jump to `offset` without animation
    #[instrument(skip(self))]
    pub async fn scroll_to(&self, offset: u32) -> Result<()> {
        self.surface.scroll_to(offset).await.map_err(|e| {
            ScrollError::ScrollFailed {
                offset,
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Current scroll offset
    pub async fn scroll_position(&self) -> Result<u32> {
        self.surface
            .scroll_offset()
            .await
            .map_err(|e| ScrollError::MetricsFailed(e.to_string()).into())
    }

    /// Wait for layout to settle
    pub async fn settle(&self, strategy: &Settle) -> Result<()> {
        match *strategy {
            Settle::Fixed(delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
            Settle::Poll {
                interval,
                stable_reads,
                timeout,
            } => self.poll_until_stable(interval, stable_reads, timeout).await,
        }
    }

    async fn poll_until_stable(
        &self,
        interval: Duration,
        stable_reads: u32,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last = self.reading().await?;
        let mut stable = 1;

        while stable < stable_reads.max(1) {
            if tokio::time::Instant::now() >= deadline {
                debug!("Layout did not settle within {:?}, continuing", timeout);
                return Ok(());
            }
            tokio::time::sleep(interval).await;
            let current = self.reading().await?;
            if current == last {
                stable += 1;
            } else {
                stable = 1;
                last = current;
            }
        }

        Ok(())
    }

    async fn reading(&self) -> Result<(u32, u32)> {
        let offset = self.scroll_position().await?;
        let height = self.full_height().await?;
        Ok((offset, height))
    }
}
