//! Stereo MJPEG streamer
//!
//! Serves one or two camera feeds as `multipart/x-mixed-replace` JPEG streams
//! for side-by-side viewing in a mobile browser. Each camera publishes into a
//! [`FrameBroadcaster`]; every HTTP client pulls the latest frame at its own
//! pace.

pub mod broadcast;
pub mod capture;
pub mod config;
pub mod context;
pub mod server;

pub use broadcast::{BroadcastStats, Frame, FrameBroadcaster, FrameSubscriber};
pub use capture::{CameraRole, CameraStream, CaptureError, FrameSource, Pipelines};
pub use config::{Config, ConfigError};
pub use context::AppContext;
pub use server::StreamingServer;
