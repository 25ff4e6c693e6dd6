//! Viewer page served at `/index.html`.
//!
//! Both variants are the same side-by-side layout with a wake-lock toggle;
//! they differ only in where the two `<img>` tags pull their streams from.

use bytes::Bytes;

use crate::config::PageConfig;

const VIEWER_TEMPLATE: &str = include_str!("../../web/index.html");

/// Which stereo layout the page uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVariant {
    /// One camera here; each eye comes from its own Pi (see [`PageConfig`]).
    SingleCamera,
    /// Both cameras on this host, served as `leftstream.mjpg`/`rightstream.mjpg`.
    DualCamera,
}

pub fn render(variant: PageVariant, page: &PageConfig) -> Bytes {
    let (left, right) = match variant {
        PageVariant::SingleCamera => (page.left_url.as_str(), page.right_url.as_str()),
        PageVariant::DualCamera => ("leftstream.mjpg", "rightstream.mjpg"),
    };

    let html = VIEWER_TEMPLATE
        .replace("LEFT_STREAM_PLACEHOLDER", left)
        .replace("RIGHT_STREAM_PLACEHOLDER", right);
    Bytes::from(html)
}
