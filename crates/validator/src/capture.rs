//! Supervised screenshot capture over CDP.
//!
//! Drives the shared browser session to navigate, stabilize and emit a
//! raster screenshot. Every browser step is individually timeout-raced so a
//! hung navigation degrades to a typed failure instead of stalling the
//! pipeline, and the protocol connection is torn down on every path.

use crate::browser::cdp::CdpClient;
use crate::browser::session::SessionManager;
use crate::raster::Raster;
use pagelens_core::config::{NAVIGATION_TIMEOUT, SETTLE_DELAY};
use pagelens_core::{Bounds, Error, Result, Viewport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct Capturer {
    sessions: Arc<SessionManager>,
    navigation_timeout: Duration,
}

impl Capturer {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            navigation_timeout: NAVIGATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Capture the page at `url` rendered at `viewport`.
    pub async fn capture(&self, url: &str, viewport: Viewport, port: u16) -> Result<Raster> {
        self.capture_inner(url, viewport, None, port).await
    }

    /// Capture a sub-rectangle of the page, rendered at `full_viewport`.
    /// Scroll is reset to the origin first so the clip is in stable
    /// document coordinates.
    pub async fn capture_region(
        &self,
        url: &str,
        region: Bounds,
        full_viewport: Viewport,
        port: u16,
    ) -> Result<Raster> {
        self.capture_inner(url, full_viewport, Some(region), port).await
    }

    async fn capture_inner(
        &self,
        url: &str,
        viewport: Viewport,
        clip: Option<Bounds>,
        port: u16,
    ) -> Result<Raster> {
        self.sessions.ensure_ready(port).await?;
        let ws_url = self.sessions.page_ws_url(port).await?;
        let client = CdpClient::connect(&ws_url, self.navigation_timeout).await?;

        // The connection must not outlive this call whatever happens below.
        let result = self.drive(&client, url, viewport, clip).await;
        client.close();
        result
    }

    async fn drive(
        &self,
        client: &CdpClient,
        url: &str,
        viewport: Viewport,
        clip: Option<Bounds>,
    ) -> Result<Raster> {
        client.set_device_metrics(viewport.width, viewport.height).await?;
        client.enable_domain("Page").await?;

        // Subscribe before navigating so the load event cannot be missed.
        let mut load_events = client.subscribe_event("Page.loadEventFired").await;
        info!(url, width = viewport.width, height = viewport.height, "navigating");
        client.navigate(url).await?;

        tokio::time::timeout(self.navigation_timeout, load_events.recv())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "load event for {} after {:?}",
                    url, self.navigation_timeout
                ))
            })?;

        // Let late-painting content (fonts, images) finish.
        tokio::time::sleep(SETTLE_DELAY).await;

        if clip.is_some() {
            client.evaluate("window.scrollTo(0, 0)").await?;
        }

        debug!(?clip, "capturing screenshot");
        let data = client.capture_screenshot(clip).await?;
        Raster::from_base64(&data)
    }
}
