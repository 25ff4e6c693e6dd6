//! Platform detection and GStreamer pipeline descriptions for camera sources

use std::env;
use std::fmt;

use tracing::warn;

use crate::config::CameraConfig;

/// Platform information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformInfo {
    /// macOS (Darwin)
    MacOS,

    /// Raspberry Pi (detected via device tree)
    RaspberryPi,

    /// Generic Linux
    Linux,
}

/// Detects current platform
pub fn detect_platform() -> PlatformInfo {
    match env::consts::OS {
        "macos" => PlatformInfo::MacOS,
        "linux" if is_raspberry_pi() => PlatformInfo::RaspberryPi,
        _ => PlatformInfo::Linux,
    }
}

fn is_raspberry_pi() -> bool {
    std::path::Path::new("/proc/device-tree/model").exists()
        || std::path::Path::new("/sys/firmware/devicetree/base/model").exists()
}

/// Which camera the source element should open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSelector {
    /// Device path, device index or libcamera camera id
    Device(String),
    /// Whatever camera the source element picks by default
    First,
}

impl fmt::Display for CameraSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSelector::Device(device) => f.write_str(device),
            CameraSelector::First => f.write_str("default"),
        }
    }
}

/// Default device for the camera at `camera_index` (0 = left, 1 = right).
///
/// `None` on a Pi: libcamera ids depend on board and sensor, so they are
/// looked up at runtime with [`select_libcamera_camera`].
pub fn default_device_path(platform: PlatformInfo, camera_index: usize) -> Option<String> {
    match platform {
        PlatformInfo::MacOS => Some(camera_index.to_string()),
        PlatformInfo::RaspberryPi => None,
        PlatformInfo::Linux => Some(format!("/dev/video{}", camera_index)),
    }
}

/// Pick camera number `camera_index` out of the ids libcamera enumerated.
///
/// The first camera falls back to `libcamerasrc`'s own choice when nothing
/// was enumerated; any other index must exist.
pub fn select_libcamera_camera(cameras: &[String], camera_index: usize) -> Option<CameraSelector> {
    match cameras.get(camera_index) {
        Some(id) => Some(CameraSelector::Device(id.clone())),
        None if camera_index == 0 => Some(CameraSelector::First),
        None => None,
    }
}

/// GStreamer launch line ending in a JPEG `appsink` named "sink".
pub fn capture_pipeline(
    platform: PlatformInfo,
    camera: &CameraSelector,
    config: &CameraConfig,
) -> String {
    let source = match (platform, camera) {
        (PlatformInfo::MacOS, CameraSelector::Device(index)) => {
            format!("avfvideosrc device-index={}", index)
        }
        (PlatformInfo::MacOS, CameraSelector::First) => "avfvideosrc".to_string(),
        (PlatformInfo::RaspberryPi, CameraSelector::Device(id)) => {
            format!("libcamerasrc camera-name=\"{}\"", id)
        }
        (PlatformInfo::RaspberryPi, CameraSelector::First) => "libcamerasrc".to_string(),
        (PlatformInfo::Linux, CameraSelector::Device(path)) => format!("v4l2src device={}", path),
        (PlatformInfo::Linux, CameraSelector::First) => "v4l2src".to_string(),
    };

    // libcamera negotiates NV12 on the Pi ISP
    let format = match platform {
        PlatformInfo::RaspberryPi => "format=NV12,",
        _ => "",
    };

    let mut pipeline = format!(
        "{} ! video/x-raw,{}width={},height={},framerate={}/1",
        source, format, config.width, config.height, config.fps
    );

    if let Some(ref flip) = config.flip_method {
        pipeline.push_str(flip_element(flip));
    }

    // Leaky queue + dropping appsink: never hold more than two frames back
    pipeline.push_str(&format!(
        " ! queue max-size-buffers=2 leaky=downstream ! videoconvert ! jpegenc quality={} ! appsink name=sink max-buffers=2 drop=true sync=false",
        config.quality
    ));

    pipeline
}

fn flip_element(method: &str) -> &'static str {
    match method {
        "none" => "",
        "vertical-flip" => " ! videoflip video-direction=5",
        "horizontal-flip" => " ! videoflip video-direction=4",
        "rotate-180" => " ! videoflip video-direction=2",
        "rotate-90" => " ! videoflip video-direction=1",
        "rotate-270" => " ! videoflip video-direction=3",
        _ => {
            warn!(method = %method, "Unknown flip method");
            ""
        }
    }
}
