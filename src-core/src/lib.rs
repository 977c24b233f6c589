//! Rolling-buffer screen clip recorder.
//!
//! Continuously captures the primary display (and optionally microphone
//! plus desktop audio) into fixed-size in-memory ring buffers, so the
//! trailing N seconds can be saved to an MP4 at any moment without
//! interrupting capture. Existing clips can be trimmed to a frame range
//! and carry plain-text sidecar metadata for labels and timestamps.
//!
//! Entry point is [`ClipRecorder`]; everything long-running reports back
//! on its [`RecorderEvent`] channel.
//!
//! Encoding, muxing and decoding shell out to FFmpeg, so a usable
//! `ffmpeg` binary (next to the executable or on PATH) is required for
//! exports and trims.

pub mod audio;
pub mod buffer;
pub mod capture;
pub mod clips;
pub mod config;
pub mod encoder;
pub mod error;
pub(crate) mod export;
pub mod state;
pub mod trim;

pub use audio::{list_candidate_devices, AudioSourceKind, DeviceDescriptor};
pub use capture::{CaptureState, Frame};
pub use clips::ClipRecord;
pub use config::{load_config, save_config, AudioConfig, RecorderConfig};
pub use encoder::{detect_h264_encoder, ffmpeg_available, mux_available};
pub use error::{AudioError, CaptureError, ExportError, TrimError};
pub use state::{ClipRecorder, RecorderEvent};
