//! Application state shared with every connection

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::broadcast::FrameBroadcaster;
use crate::capture::{CameraRole, Pipelines};
use crate::config::{Config, PageConfig};
use crate::server::pages::{self, PageVariant};

/// How long a new connection may take to send its request head
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Built once at startup and handed to the server behind an `Arc`.
///
/// A missing broadcaster means that camera was never initialized; routes bound
/// to it answer 404 instead of waiting.
#[derive(Debug, Clone)]
pub struct AppContext {
    left: Option<Arc<FrameBroadcaster>>,
    right: Option<Arc<FrameBroadcaster>>,
    page_variant: PageVariant,
    index_page: Bytes,
    stream_timeout: Option<Duration>,
    request_timeout: Duration,
}

impl AppContext {
    pub fn new(
        left: Option<Arc<FrameBroadcaster>>,
        right: Option<Arc<FrameBroadcaster>>,
        page: &PageConfig,
    ) -> Self {
        let page_variant = if left.is_some() && right.is_some() {
            PageVariant::DualCamera
        } else {
            PageVariant::SingleCamera
        };

        Self {
            left,
            right,
            page_variant,
            index_page: pages::render(page_variant, page),
            stream_timeout: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn from_pipelines(pipelines: &Pipelines, config: &Config) -> Self {
        Self::new(
            pipelines.left_broadcaster(),
            pipelines.right_broadcaster(),
            &config.page,
        )
        .with_stream_timeout(config.server.stream_timeout())
    }

    pub fn with_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn broadcaster(&self, role: CameraRole) -> Option<&Arc<FrameBroadcaster>> {
        match role {
            CameraRole::Left => self.left.as_ref(),
            CameraRole::Right => self.right.as_ref(),
        }
    }

    pub fn page_variant(&self) -> PageVariant {
        self.page_variant
    }

    /// Rendered `/index.html`, cheap to clone per request
    pub fn index_page(&self) -> Bytes {
        self.index_page.clone()
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}
