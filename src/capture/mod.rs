//! Camera pipelines: a frame source paired with the broadcaster it feeds.
//!
//! Sources publish one JPEG per encoded frame from their own thread (the
//! GStreamer streaming thread or a dedicated test-pattern thread) and never
//! wait on consumers.

#[cfg(feature = "libcamera")]
mod gst;
pub mod platform;
mod test_pattern;

#[cfg(feature = "libcamera")]
pub use gst::GstCamera;
pub use platform::PlatformInfo;
pub use test_pattern::TestPattern;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::broadcast::FrameBroadcaster;
use crate::config::{CameraConfig, CamerasConfig, SourceKind};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "libcamera")]
    #[error("GStreamer error: {0}")]
    Gst(#[from] gstreamer::glib::Error),

    #[error("state change error: {0}")]
    StateChange(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to spawn capture thread: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture already running")]
    AlreadyRunning,
}

/// Which eye a camera serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraRole {
    Left,
    Right,
}

impl CameraRole {
    /// Sensor index, matching libcamera's enumeration order
    pub fn index(self) -> usize {
        match self {
            CameraRole::Left => 0,
            CameraRole::Right => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CameraRole::Left => "left",
            CameraRole::Right => "right",
        }
    }
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera acquisition + JPEG encoding collaborator.
///
/// Once started, a source calls [`FrameBroadcaster::publish`] once per
/// encoded frame until stopped.
pub trait FrameSource: Send {
    fn start(&mut self, broadcaster: Arc<FrameBroadcaster>) -> Result<(), CaptureError>;

    /// Stop producing frames. Calling this on a stopped source is a no-op.
    fn stop(&mut self) -> Result<(), CaptureError>;

    fn is_running(&self) -> bool;

    fn describe(&self) -> String;
}

/// Build the configured source for one camera, probing the hardware.
pub fn open_source(
    role: CameraRole,
    config: &CameraConfig,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    match config.source {
        SourceKind::TestPattern => Ok(Box::new(TestPattern::new(role, config))),
        #[cfg(feature = "libcamera")]
        SourceKind::Libcamera => Ok(Box::new(GstCamera::open(role, config)?)),
        #[cfg(not(feature = "libcamera"))]
        SourceKind::Libcamera => Err(CaptureError::Unavailable(format!(
            "{} camera: built without the `libcamera` feature",
            role
        ))),
    }
}

/// One physical camera and the broadcaster its frames go to.
pub struct CameraStream {
    role: CameraRole,
    source: Box<dyn FrameSource>,
    broadcaster: Arc<FrameBroadcaster>,
}

impl CameraStream {
    pub fn open(role: CameraRole, config: &CameraConfig) -> Result<Self, CaptureError> {
        let source = open_source(role, config)?;
        Ok(Self::with_source(role, source))
    }

    pub fn with_source(role: CameraRole, source: Box<dyn FrameSource>) -> Self {
        Self {
            role,
            source,
            broadcaster: Arc::new(FrameBroadcaster::new(role.as_str())),
        }
    }

    pub fn role(&self) -> CameraRole {
        self.role
    }

    pub fn broadcaster(&self) -> Arc<FrameBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    pub fn is_recording(&self) -> bool {
        self.source.is_running()
    }

    pub fn start_recording(&mut self) -> Result<(), CaptureError> {
        if self.source.is_running() {
            return Err(CaptureError::AlreadyRunning);
        }

        self.source.start(Arc::clone(&self.broadcaster))?;
        info!(camera = %self.role, source = %self.source.describe(), "Recording started");
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<(), CaptureError> {
        if !self.source.is_running() {
            return Ok(());
        }

        self.source.stop()?;
        let stats = self.broadcaster.stats();
        info!(
            camera = %self.role,
            frames = stats.frames_published,
            "Recording stopped"
        );
        Ok(())
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop_recording() {
            warn!(camera = %self.role, error = %e, "Failed to stop recording");
        }
    }
}

/// The zero, one or two camera pipelines of this process.
///
/// Dropping it stops recording on every pipeline, so shutdown happens on all
/// exit paths including errors and panics.
#[derive(Default)]
pub struct Pipelines {
    left: Option<CameraStream>,
    right: Option<CameraStream>,
}

impl Pipelines {
    pub fn new(left: Option<CameraStream>, right: Option<CameraStream>) -> Self {
        Self { left, right }
    }

    /// Open every enabled camera. A camera that fails to open is disabled
    /// with a warning instead of failing the process.
    pub fn detect(config: &CamerasConfig) -> Self {
        let left = detect_one(CameraRole::Left, &config.left);
        let right = detect_one(CameraRole::Right, &config.right);
        Self::new(left, right)
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn is_stereo(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    pub fn left(&self) -> Option<&CameraStream> {
        self.left.as_ref()
    }

    pub fn right(&self) -> Option<&CameraStream> {
        self.right.as_ref()
    }

    pub fn left_broadcaster(&self) -> Option<Arc<FrameBroadcaster>> {
        self.left.as_ref().map(CameraStream::broadcaster)
    }

    pub fn right_broadcaster(&self) -> Option<Arc<FrameBroadcaster>> {
        self.right.as_ref().map(CameraStream::broadcaster)
    }

    /// Start every pipeline. One that refuses to start is dropped, leaving the
    /// rest running in degraded mode.
    ///
    /// Returns `false` when no camera is left to serve, in which case the
    /// server should not be started.
    #[must_use]
    pub fn start_recording(&mut self) -> bool {
        for slot in [&mut self.left, &mut self.right] {
            let failed = match slot.as_mut().map(|s| (s.role(), s.start_recording())) {
                Some((role, Err(e))) => {
                    warn!(camera = %role, error = %e, "Camera failed to start, disabling it");
                    true
                }
                _ => false,
            };
            if failed {
                *slot = None;
            }
        }
        !self.is_empty()
    }

    pub fn stop_recording(&mut self) {
        for stream in [&mut self.left, &mut self.right].into_iter().flatten() {
            if let Err(e) = stream.stop_recording() {
                warn!(camera = %stream.role(), error = %e, "Failed to stop recording");
            }
        }
    }

    pub fn log_stats(&self) {
        for stream in [&self.left, &self.right].into_iter().flatten() {
            stream.broadcaster.log_stats();
        }
    }
}

impl Drop for Pipelines {
    fn drop(&mut self) {
        self.stop_recording();
    }
}

fn detect_one(role: CameraRole, config: &CameraConfig) -> Option<CameraStream> {
    if !config.enabled {
        info!(camera = %role, "Camera disabled in configuration");
        return None;
    }

    match CameraStream::open(role, config) {
        Ok(stream) => {
            info!(camera = %role, source = %stream.source.describe(), "Camera detected");
            Some(stream)
        }
        Err(e) => {
            warn!(camera = %role, error = %e, "Camera unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that records start/stop calls and publishes one frame on start.
    struct ScriptedSource {
        running: bool,
        fail_start: bool,
        stops: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn boxed(fail_start: bool, stops: Arc<AtomicUsize>) -> Box<dyn FrameSource> {
            Box::new(Self {
                running: false,
                fail_start,
                stops,
            })
        }
    }

    impl FrameSource for ScriptedSource {
        fn start(&mut self, broadcaster: Arc<FrameBroadcaster>) -> Result<(), CaptureError> {
            if self.fail_start {
                return Err(CaptureError::StateChange("refused".to_string()));
            }
            broadcaster.publish(vec![0xFF, 0xD8, 0xFF, 0xD9]);
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            self.running = false;
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[test]
    fn test_role_names() {
        assert_eq!(CameraRole::Left.to_string(), "left");
        assert_eq!(CameraRole::Right.index(), 1);
    }

    #[test]
    fn test_start_and_stop_recording() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut stream =
            CameraStream::with_source(CameraRole::Left, ScriptedSource::boxed(false, stops.clone()));

        stream.start_recording().unwrap();
        assert!(stream.is_recording());
        assert_eq!(stream.broadcaster().generation(), 1);
        assert!(matches!(
            stream.start_recording(),
            Err(CaptureError::AlreadyRunning)
        ));

        stream.stop_recording().unwrap();
        stream.stop_recording().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_stops_every_pipeline() {
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let mut pipelines = Pipelines::new(
                Some(CameraStream::with_source(
                    CameraRole::Left,
                    ScriptedSource::boxed(false, stops.clone()),
                )),
                Some(CameraStream::with_source(
                    CameraRole::Right,
                    ScriptedSource::boxed(false, stops.clone()),
                )),
            );
            assert!(pipelines.start_recording());
            assert!(pipelines.is_stereo());
        }
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_start_degrades_to_single_camera() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut pipelines = Pipelines::new(
            Some(CameraStream::with_source(
                CameraRole::Left,
                ScriptedSource::boxed(false, stops.clone()),
            )),
            Some(CameraStream::with_source(
                CameraRole::Right,
                ScriptedSource::boxed(true, stops.clone()),
            )),
        );

        assert!(pipelines.start_recording());
        assert!(!pipelines.is_stereo());
        assert!(pipelines.left_broadcaster().is_some());
        assert!(pipelines.right_broadcaster().is_none());
    }

    #[test]
    fn test_no_cameras_means_nothing_to_serve() {
        let mut pipelines = Pipelines::default();
        assert!(!pipelines.start_recording());

        let mut config = CamerasConfig::default();
        config.left.enabled = false;
        config.right.enabled = false;
        assert!(!Pipelines::detect(&config).start_recording());
    }

    #[test]
    fn test_every_camera_failing_to_start_means_nothing_to_serve() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut pipelines = Pipelines::new(
            Some(CameraStream::with_source(
                CameraRole::Left,
                ScriptedSource::boxed(true, stops.clone()),
            )),
            Some(CameraStream::with_source(
                CameraRole::Right,
                ScriptedSource::boxed(true, stops.clone()),
            )),
        );

        assert!(!pipelines.start_recording());
        assert!(pipelines.is_empty());
    }

    #[test]
    fn test_right_camera_alone_still_serves() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut pipelines = Pipelines::new(
            None,
            Some(CameraStream::with_source(
                CameraRole::Right,
                ScriptedSource::boxed(false, stops),
            )),
        );

        assert!(pipelines.start_recording());
        assert!(pipelines.left_broadcaster().is_none());
        assert_eq!(pipelines.right_broadcaster().unwrap().generation(), 1);
    }

    #[test]
    fn test_detect_skips_disabled_and_unavailable_cameras() {
        let mut config = CamerasConfig::default();
        config.left.source = SourceKind::TestPattern;
        config.right.enabled = false;

        let pipelines = Pipelines::detect(&config);
        assert!(pipelines.left().is_some());
        assert!(pipelines.right().is_none());
        assert!(!pipelines.is_empty());
    }

    #[cfg(not(feature = "libcamera"))]
    #[test]
    fn test_libcamera_source_unavailable_without_feature() {
        let config = CamerasConfig::default();
        let pipelines = Pipelines::detect(&config);
        assert!(pipelines.is_empty());
    }
}
