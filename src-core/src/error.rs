//! Error types for the capture, export and trim pipelines.
//!
//! Failures are typed so callers can distinguish "degraded but succeeded"
//! (e.g. a video-only export because the muxer is missing) from a real
//! failure. Loop-level faults are additionally surfaced through the
//! [`RecorderEvent`](crate::RecorderEvent) channel.

use std::path::PathBuf;

/// Errors raised while capturing screen frames.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A single capture attempt failed; the loop retries a bounded
    /// number of times before faulting.
    #[error("transient capture failure: {0}")]
    Transient(String),

    /// Screen-recording access appears to be lost (e.g. every frame
    /// comes back uniformly black). Stops the loop.
    #[error("screen capture permission lost: {0}")]
    PermissionLost(String),

    /// The capture device is gone or could not be opened. Stops the loop.
    #[error("fatal capture failure: {0}")]
    Fatal(String),
}

/// Errors raised while opening audio devices or streams.
///
/// These are never fatal to a recording session: a source that fails to
/// open is skipped and capture proceeds with whatever sources succeeded.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// The requested device was not found.
    #[error("audio device not found: {name}")]
    DeviceNotFound {
        /// Name or id of the device that wasn't found.
        name: String,
    },

    /// No device matching the requested role exists on this system.
    #[error("no {role} device available")]
    NoDevice {
        /// Human-readable role ("microphone" / "desktop loopback").
        role: &'static str,
    },

    /// The device produces a sample format we cannot consume.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The format that wasn't supported.
        format: String,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Errors raised by the export pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The buffer holds no frames (or a zero-length window was requested).
    #[error("no buffered frames to export")]
    InsufficientData,

    /// Video encoding failed. Includes a remediation hint when the
    /// external FFmpeg tool itself is missing.
    #[error("video encoding failed: {0}")]
    Encode(String),

    /// Audio/video muxing failed. The pipeline falls back to a
    /// video-only output before surfacing this.
    #[error("audio/video muxing failed: {0}")]
    Mux(String),

    /// Writing the final output or its sidecar failed.
    #[error("writing clip failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the trim pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TrimError {
    /// `start_frame..=end_frame` is not a valid inclusive range.
    #[error("invalid trim range: start {start} must be less than end {end}")]
    InvalidRange {
        /// Requested first frame (inclusive).
        start: u64,
        /// Requested last frame (inclusive).
        end: u64,
    },

    /// The source file does not exist or cannot be opened.
    #[error("cannot open trim source: {path}")]
    SourceNotFound {
        /// Path that could not be opened.
        path: PathBuf,
    },

    /// A frame inside the requested range could not be read; the trim
    /// stops at the first gap instead of writing a shorter clip.
    #[error("could not read frame {frame} from source")]
    SeekOrRead {
        /// Index of the first unreadable frame.
        frame: u64,
    },

    /// Decoding the source failed before any range error could be
    /// classified.
    #[error("decoding source failed: {0}")]
    Decode(String),

    /// Re-encoding the selected range failed.
    #[error("re-encoding trimmed clip failed: {0}")]
    Encode(String),

    /// Writing the output or its sidecar failed.
    #[error("writing trimmed clip failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_display_names_the_class() {
        let err = CaptureError::Transient("grab failed".into());
        assert_eq!(err.to_string(), "transient capture failure: grab failed");
        let err = CaptureError::PermissionLost("all-black frames".into());
        assert!(err.to_string().contains("permission lost"));
    }

    #[test]
    fn trim_error_reports_first_missing_frame() {
        let err = TrimError::SeekOrRead { frame: 42 };
        assert_eq!(err.to_string(), "could not read frame 42 from source");
    }

    #[test]
    fn export_error_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ExportError = io.into();
        assert!(matches!(err, ExportError::Io(_)));
    }
}
