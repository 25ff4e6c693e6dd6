//! Synthetic JPEG source for running without camera hardware

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, warn};

use super::{CameraRole, CaptureError, FrameSource};
use crate::broadcast::FrameBroadcaster;
use crate::config::CameraConfig;

/// Horizontal offset of the right eye's bar, gives the pair some depth
const PARALLAX_PX: u32 = 12;
const BAR_WIDTH: u32 = 24;

/// Moving gradient with a vertical bar, rendered and JPEG-encoded on a
/// dedicated thread at the configured frame rate.
pub struct TestPattern {
    role: CameraRole,
    width: u32,
    height: u32,
    quality: u8,
    interval: Duration,
    is_running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TestPattern {
    pub fn new(role: CameraRole, config: &CameraConfig) -> Self {
        Self {
            role,
            width: config.width,
            height: config.height,
            quality: config.quality.clamp(1, 100) as u8,
            interval: Duration::from_secs(1) / config.fps.max(1),
            is_running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Render and encode frame number `tick`.
    pub fn render(&self, tick: u64) -> Result<Vec<u8>, CaptureError> {
        render_frame(self.role, self.width, self.height, self.quality, tick)
    }
}

fn render_frame(
    role: CameraRole,
    width: u32,
    height: u32,
    quality: u8,
    tick: u64,
) -> Result<Vec<u8>, CaptureError> {
    let shift = (tick.wrapping_mul(4) % 256) as u32;
    let offset = match role {
        CameraRole::Left => 0,
        CameraRole::Right => PARALLAX_PX,
    };
    let bar_x = ((tick.wrapping_mul(6) + u64::from(offset)) % u64::from(width.max(1))) as u32;

    let (w, h) = (u64::from(width.max(1)), u64::from(height.max(1)));
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let in_bar = x >= bar_x && x - bar_x < BAR_WIDTH;
            if in_bar {
                rgb.extend_from_slice(&[255, 255, 255]);
                continue;
            }
            let r = ((u64::from(x) * 255 / w + u64::from(shift)) % 256) as u8;
            let g = ((u64::from(y) * 255 / h) % 256) as u8;
            let b = match role {
                CameraRole::Left => 64,
                CameraRole::Right => 192,
            };
            rgb.extend_from_slice(&[r, g, b]);
        }
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode(
        &rgb,
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg)
}

impl FrameSource for TestPattern {
    fn start(&mut self, broadcaster: Arc<FrameBroadcaster>) -> Result<(), CaptureError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        // Frame 0 is encoded here so a size the encoder rejects fails the
        // start instead of leaving a silent broadcaster behind
        let first = match self.render(0) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        broadcaster.publish(first);

        let (role, width, height, quality, interval) =
            (self.role, self.width, self.height, self.quality, self.interval);
        let is_running = Arc::clone(&self.is_running);

        let spawned = thread::Builder::new()
            .name(format!("{}-test-pattern", role))
            .spawn(move || {
                let mut tick = 1u64;
                thread::sleep(interval);
                while is_running.load(Ordering::SeqCst) {
                    match render_frame(role, width, height, quality, tick) {
                        Ok(jpeg) => {
                            broadcaster.publish(jpeg);
                        }
                        Err(e) => {
                            warn!(camera = %role, error = %e, "Test pattern encoding failed");
                            is_running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    tick += 1;
                    thread::sleep(interval);
                }
                debug!(camera = %role, frames = tick, "Test pattern thread exiting");
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(camera = %self.role, "Test pattern thread panicked");
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        format!("test-pattern:{}x{}", self.width, self.height)
    }
}
