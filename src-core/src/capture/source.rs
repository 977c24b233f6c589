//! Frame sources.
//!
//! The capture loop is generic over [`FrameSource`] so tests can drive it
//! with synthetic frames. The production source grabs the primary monitor
//! through `xcap` and converts to the canonical RGB24 layout.

use std::time::Instant;

use crate::capture::types::Frame;
use crate::error::CaptureError;

/// Something that can produce frames on demand.
///
/// Implementations are driven from a single capture thread, so `&mut self`
/// is fine and no internal synchronization is required.
pub trait FrameSource {
    /// Grab one frame. Transient failures are retried by the loop;
    /// `Fatal` and `PermissionLost` stop it.
    fn capture_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Captures the primary monitor via `xcap`.
pub struct PrimaryDisplaySource {
    monitor: xcap::Monitor,
}

impl PrimaryDisplaySource {
    /// Locate the primary monitor. Falls back to the first monitor when
    /// none is flagged primary (some Wayland compositors report none).
    pub fn open() -> Result<Self, CaptureError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| CaptureError::Fatal(format!("failed to enumerate monitors: {e}")))?;

        if monitors.is_empty() {
            return Err(CaptureError::Fatal("no monitors found".into()));
        }

        let monitor = monitors
            .iter()
            .find(|m| m.is_primary())
            .cloned()
            .unwrap_or_else(|| monitors[0].clone());

        tracing::info!(
            name = monitor.name(),
            width = monitor.width(),
            height = monitor.height(),
            "capturing primary display"
        );

        Ok(Self { monitor })
    }
}

impl FrameSource for PrimaryDisplaySource {
    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let image = self
            .monitor
            .capture_image()
            .map_err(|e| CaptureError::Transient(format!("screen grab failed: {e}")))?;

        let width = image.width();
        let height = image.height();
        let data = rgba_to_rgb24(&image.into_raw());

        Ok(Frame {
            width,
            height,
            data,
            captured_at: Instant::now(),
        })
    }
}

/// Strip the alpha channel from interleaved RGBA pixels.
fn rgba_to_rgb24(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}
