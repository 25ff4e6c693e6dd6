//! GStreamer-based JPEG capture

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, info};

use super::platform::{self, CameraSelector};
use super::{CameraRole, CaptureError, FrameSource};
use crate::broadcast::FrameBroadcaster;
use crate::config::CameraConfig;

/// A camera read through `libcamerasrc` (or `v4l2src`/`avfvideosrc` off-Pi)
/// and encoded by `jpegenc`.
pub struct GstCamera {
    role: CameraRole,
    device: String,
    pipeline: gst::Pipeline,
    app_sink: gst_app::AppSink,
    is_running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
}

impl GstCamera {
    /// Build the pipeline and bring it to PAUSED, which makes the source
    /// claim the sensor. A camera that is not connected fails here.
    pub fn open(role: CameraRole, config: &CameraConfig) -> Result<Self, CaptureError> {
        gst::init()?;

        let platform = platform::detect_platform();
        let camera = match config
            .device
            .clone()
            .or_else(|| platform::default_device_path(platform, role.index()))
        {
            Some(device) => CameraSelector::Device(device),
            None => {
                let cameras = libcamera_cameras();
                debug!(camera = %role, found = ?cameras, "Enumerated libcamera cameras");
                platform::select_libcamera_camera(&cameras, role.index()).ok_or_else(|| {
                    CaptureError::Unavailable(format!(
                        "{} camera: libcamera lists {} camera(s)",
                        role,
                        cameras.len()
                    ))
                })?
            }
        };
        let device = camera.to_string();

        let pipeline_desc = platform::capture_pipeline(platform, &camera, config);
        debug!(camera = %role, pipeline = %pipeline_desc, "Creating GStreamer pipeline");

        let pipeline = gst::parse::launch(&pipeline_desc)?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Pipeline("Not a pipeline".to_string()))?;

        let app_sink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::Pipeline("No appsink found".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Pipeline("Not an appsink".to_string()))?;

        if let Err(e) = pipeline.set_state(gst::State::Paused) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(CaptureError::Unavailable(format!(
                "{} camera {} ({:?}): {:?}",
                role, device, platform, e
            )));
        }

        Ok(Self {
            role,
            device,
            pipeline,
            app_sink,
            is_running: Arc::new(AtomicBool::new(false)),
            frame_count: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}

/// Ids of the cameras libcamera exposes, in enumeration order.
fn libcamera_cameras() -> Vec<String> {
    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Video/Source"), None);
    if let Err(e) = monitor.start() {
        debug!(error = %e, "Device monitor failed to start");
        return Vec::new();
    }

    let cameras = monitor
        .devices()
        .iter()
        .filter_map(|device| {
            let element = device.create_element(None).ok()?;
            if element.factory()?.name().as_str() != "libcamerasrc" {
                return None;
            }
            element
                .property_value("camera-name")
                .get::<Option<String>>()
                .ok()
                .flatten()
        })
        .collect();

    monitor.stop();
    cameras
}

impl FrameSource for GstCamera {
    fn start(&mut self, broadcaster: Arc<FrameBroadcaster>) -> Result<(), CaptureError> {
        if self.is_running.load(Ordering::Relaxed) {
            return Err(CaptureError::AlreadyRunning);
        }

        let frame_count = Arc::clone(&self.frame_count);
        let is_running = Arc::clone(&self.is_running);

        self.app_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    if !is_running.load(Ordering::Relaxed) {
                        return Ok(gst::FlowSuccess::Ok);
                    }

                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                    // The buffer belongs to the pipeline, so copy it out once
                    broadcaster.publish(Bytes::copy_from_slice(map.as_slice()));
                    frame_count.fetch_add(1, Ordering::Relaxed);

                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        self.is_running.store(true, Ordering::Relaxed);
        if let Err(e) = self.pipeline.set_state(gst::State::Playing) {
            self.is_running.store(false, Ordering::Relaxed);
            return Err(CaptureError::StateChange(format!("{:?}", e)));
        }

        info!(camera = %self.role, device = %self.device, "GStreamer capture playing");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.is_running.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CaptureError::StateChange(format!("{:?}", e)))?;

        info!(
            camera = %self.role,
            frames = self.frames_captured(),
            "GStreamer capture stopped"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    fn describe(&self) -> String {
        format!("libcamera:{}", self.device)
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

