//! Recorder facade.
//!
//! [`ClipRecorder`] owns the capture loop, the audio session and the
//! ring buffers, and exposes the operations a shell builds on:
//! start/stop, "save the last N seconds", trim, and clip library
//! management. Long-running work (export, trim) is handed to worker
//! threads; outcomes arrive on the event channel returned by `new`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::audio::{AudioBuffers, AudioCaptureSession};
use crate::buffer::RingBuffer;
use crate::capture::recorder::{CaptureHandle, CaptureState};
use crate::capture::source::{FrameSource, PrimaryDisplaySource};
use crate::capture::types::Frame;
use crate::clips::{self, ClipRecord};
use crate::config::RecorderConfig;
use crate::error::{CaptureError, ExportError, TrimError};
use crate::export::{spawn_export, ExportRequest, MuxBackend};
use crate::trim;

/// Asynchronous outcomes surfaced to the caller.
#[derive(Debug)]
pub enum RecorderEvent {
    /// A clip (export or trim) finished and is on disk at this path.
    ClipSaved(PathBuf),
    /// A non-fatal condition worth showing to the user, e.g. a clip
    /// saved without audio because the muxer is missing.
    Status(String),
    /// An operation failed.
    Error(String),
}

/// The rolling-buffer recorder.
pub struct ClipRecorder {
    config: RecorderConfig,
    events: UnboundedSender<RecorderEvent>,
    frames: Arc<RingBuffer<Frame>>,
    capture: Option<CaptureHandle>,
    audio: Option<AudioCaptureSession>,
    audio_buffers: Option<AudioBuffers>,
}

impl ClipRecorder {
    /// Create a recorder and the receiving end of its event channel.
    ///
    /// Degenerate config values (zero fps or buffer length) are clamped
    /// to defaults with a warning rather than rejected.
    pub fn new(mut config: RecorderConfig) -> (Self, UnboundedReceiver<RecorderEvent>) {
        if config.fps == 0 {
            tracing::warn!("fps of 0 clamped to 30");
            config.fps = 30;
        }
        if config.buffer_seconds == 0 {
            tracing::warn!("buffer_seconds of 0 clamped to 30");
            config.buffer_seconds = 30;
        }

        let (events, rx) = tokio::sync::mpsc::unbounded_channel();
        let frames = Arc::new(RingBuffer::new(config.frame_capacity()));
        (
            Self {
                config,
                events,
                frames,
                capture: None,
                audio: None,
                audio_buffers: None,
            },
            rx,
        )
    }

    /// Current configuration.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Current capture state.
    pub fn state(&self) -> CaptureState {
        match &self.capture {
            Some(handle) => handle.state(),
            None => CaptureState::Idle,
        }
    }

    /// Start capturing the primary display. Returns false if a capture
    /// is already running.
    pub fn start_capture(&mut self) -> bool {
        self.start_capture_with(PrimaryDisplaySource::open)
    }

    /// Start capturing with a caller-supplied source. The opener runs on
    /// the capture thread itself.
    pub fn start_capture_with<S, F>(&mut self, open: F) -> bool
    where
        S: FrameSource + 'static,
        F: FnOnce() -> Result<S, CaptureError> + Send + 'static,
    {
        if matches!(self.state(), CaptureState::Capturing) {
            tracing::warn!("capture already running");
            return false;
        }
        // Drop any stopped/faulted handle before restarting.
        if let Some(handle) = self.capture.take() {
            handle.stop();
        }

        // A fresh store each session picks up any buffer/fps
        // reconfiguration done while stopped.
        self.frames = Arc::new(RingBuffer::new(self.config.frame_capacity()));

        if self.config.audio.enabled {
            let session = AudioCaptureSession::start(
                self.config.audio.microphone.clone(),
                self.config.audio.loopback.clone(),
                self.config.audio_chunk_capacity(),
            );
            if session.is_silent() {
                tracing::warn!("no audio source opened, recording video only");
                let _ = self.events.send(RecorderEvent::Status(
                    "no audio source available, recording video only".into(),
                ));
            }
            self.audio_buffers = Some(session.buffers().clone());
            self.audio = Some(session);
        } else {
            self.audio = None;
            self.audio_buffers = None;
        }

        self.capture = Some(CaptureHandle::spawn(
            open,
            self.config.fps,
            Arc::clone(&self.frames),
            self.events.clone(),
        ));
        true
    }

    /// Stop capturing. Idempotent; buffered frames stay available for
    /// export until the next start.
    pub fn stop_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            handle.stop();
        }
        if let Some(mut session) = self.audio.take() {
            session.stop();
        }
    }

    /// Change the retention window. Refused while capturing; takes
    /// effect (with a fresh, empty buffer) on the next start.
    pub fn set_buffer_seconds(&mut self, seconds: u32) -> bool {
        if matches!(self.state(), CaptureState::Capturing) {
            tracing::warn!("cannot resize buffer while capturing");
            return false;
        }
        self.config.buffer_seconds = seconds.max(1);
        true
    }

    /// Save the trailing `duration` of the buffer (the whole buffer when
    /// `None`) as a new clip.
    ///
    /// Returns the output path immediately; encoding runs on a worker
    /// thread and completion arrives as [`RecorderEvent::ClipSaved`].
    /// Only an empty buffer fails synchronously.
    pub fn request_clip(&self, duration: Option<Duration>) -> Result<PathBuf, ExportError> {
        if self.frames.is_empty() {
            return Err(ExportError::InsufficientData);
        }

        let max = Duration::from_secs(self.config.buffer_seconds as u64);
        let duration = duration.unwrap_or(max).min(max);
        if duration.is_zero() {
            return Err(ExportError::InsufficientData);
        }

        let dir = self.config.clips_dir()?;
        let output_path = clips::next_clip_path(&dir, chrono::Local::now());

        spawn_export(ExportRequest {
            frames: Arc::clone(&self.frames),
            audio: self.audio_buffers.clone(),
            duration,
            fps: self.config.fps,
            output_path: output_path.clone(),
            events: self.events.clone(),
            mux: MuxBackend::default(),
        });

        Ok(output_path)
    }

    /// Trim frames `start_frame..=end_frame` of an existing clip into a
    /// new file next to it.
    ///
    /// Range and source validation is synchronous; decoding and
    /// re-encoding run on a worker thread and the outcome arrives on the
    /// event channel.
    pub fn trim_clip(
        &self,
        source: &Path,
        start_frame: u64,
        end_frame: u64,
    ) -> Result<PathBuf, TrimError> {
        trim::validate(source, start_frame, end_frame)?;
        let output = trim::planned_output_path(source);

        let events = self.events.clone();
        let source = source.to_path_buf();
        let target = output.clone();
        std::thread::spawn(move || {
            match trim::trim_clip_to(&source, start_frame, end_frame, &target) {
                Ok(()) => {
                    let _ = events.send(RecorderEvent::ClipSaved(target));
                }
                Err(e) => {
                    tracing::error!(error = %e, "trim failed");
                    let _ = events.send(RecorderEvent::Error(e.to_string()));
                }
            }
        });

        Ok(output)
    }

    /// List clips in the configured clips directory, newest first.
    pub fn list_clips(&self) -> std::io::Result<Vec<ClipRecord>> {
        clips::list_clips(&self.config.clips_dir()?)
    }

    /// Relabel a clip, preserving its recorded timestamp.
    pub fn rename_clip(&self, video: &Path, new_name: &str) -> std::io::Result<()> {
        clips::rename_clip(video, new_name)
    }

    /// Delete a clip and its sidecar.
    pub fn delete_clip(&self, video: &Path) -> std::io::Result<()> {
        clips::delete_clip(video)
    }
}

impl Drop for ClipRecorder {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
