//! Export pipeline.
//!
//! An export snapshots the trailing window out of the ring buffers and
//! then runs entirely on its own worker thread: encode video to a hidden
//! temp file in the clips directory, stage mixed audio as a temp WAV,
//! mux the two into the final MP4, write the sidecar, clean up. Capture
//! keeps appending the whole time; nothing here touches the buffers
//! after the snapshot.
//!
//! Audio windows are cut at callback-chunk granularity (typically
//! 10-50 ms per chunk) and the mux passes `-shortest`, so A/V alignment
//! tolerance is one chunk plus container rounding.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::audio::{AudioBuffers, AudioChunk};
use crate::buffer::RingBuffer;
use crate::capture::types::Frame;
use crate::clips;
use crate::encoder::{self, AudioEncoder, VideoEncoder};
use crate::error::ExportError;
use crate::state::RecorderEvent;

/// Everything a worker needs to produce one clip.
pub(crate) struct ExportRequest {
    pub frames: Arc<RingBuffer<Frame>>,
    pub audio: Option<AudioBuffers>,
    pub duration: Duration,
    pub fps: u32,
    pub output_path: PathBuf,
    pub events: UnboundedSender<RecorderEvent>,
    pub mux: MuxBackend,
}

/// The audio half of the pipeline as swappable functions, defaulting to
/// the cached FFmpeg probes. Every failure behind these is degradable:
/// the worker falls back to a video-only clip rather than losing the
/// encoded video.
#[derive(Clone, Copy)]
pub(crate) struct MuxBackend {
    /// Whether an AAC-capable muxer exists.
    pub available: fn() -> bool,
    /// Stage mixed samples as a temp WAV, returning its path.
    pub stage: fn(&[f32], u32, u32) -> Result<PathBuf, ExportError>,
    /// Mux video + WAV into the final output.
    pub run: fn(&Path, &Path, &Path) -> Result<(), ExportError>,
}

impl Default for MuxBackend {
    fn default() -> Self {
        Self {
            available: encoder::mux_available,
            stage: stage_wav,
            run: encoder::mux_audio_video,
        }
    }
}

/// Write mixed samples to a temp WAV. A failure at any step removes the
/// partial file before surfacing the error.
fn stage_wav(samples: &[f32], sample_rate: u32, channels: u32) -> Result<PathBuf, ExportError> {
    let mut audio = AudioEncoder::new(sample_rate, channels);
    let wav_path = audio.output_path().to_path_buf();
    let staged = audio
        .start()
        .and_then(|()| audio.write_samples(samples));
    let staged = staged.and_then(|()| audio.finish().map(|_| ()));
    match staged {
        Ok(()) => Ok(wav_path),
        Err(e) => {
            cleanup(&wav_path);
            Err(e)
        }
    }
}

/// How many frames the requested window covers, clamped to what is
/// actually buffered.
pub(crate) fn frames_to_take(duration: Duration, fps: u32, buffered: usize) -> usize {
    let wanted = (duration.as_secs_f64() * fps.max(1) as f64).round() as usize;
    wanted.min(buffered)
}

/// Trailing chunks covering at least `duration`, oldest first.
pub(crate) fn audio_window(chunks: &[AudioChunk], duration: Duration) -> Vec<AudioChunk> {
    let mut covered = Duration::ZERO;
    let mut start = chunks.len();
    while start > 0 && covered < duration {
        start -= 1;
        covered += chunks[start].duration();
    }
    chunks[start..].to_vec()
}

/// Run the export on a detached worker thread. The outcome arrives on
/// the event channel.
pub(crate) fn spawn_export(request: ExportRequest) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let events = request.events.clone();
        match run_export(request) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "clip saved");
                let _ = events.send(RecorderEvent::ClipSaved(path));
            }
            Err(e) => {
                tracing::error!(error = %e, "export failed");
                let _ = events.send(RecorderEvent::Error(e.to_string()));
            }
        }
    })
}

fn run_export(request: ExportRequest) -> Result<PathBuf, ExportError> {
    let count = frames_to_take(request.duration, request.fps, request.frames.len());
    if count == 0 {
        return Err(ExportError::InsufficientData);
    }
    let frames = request.frames.snapshot_tail(count);
    tracing::info!(
        frames = frames.len(),
        seconds = request.duration.as_secs_f64(),
        "exporting clip"
    );

    let temp_video = temp_video_path(&request.output_path);
    let first = &frames[0];
    let mut video = VideoEncoder::new(first.width, first.height, request.fps, temp_video.clone())?;
    video.start()?;
    for frame in &frames {
        if let Err(e) = video.write_frame(frame) {
            cleanup(&temp_video);
            return Err(e);
        }
    }
    let temp_video = match video.finish() {
        Ok(path) => path,
        Err(e) => {
            cleanup(&temp_video);
            return Err(e);
        }
    };

    let result = attach_audio_and_finalize(&request, &temp_video);
    if result.is_err() {
        cleanup(&temp_video);
    }
    let output = result?;

    let timestamp = clips::sidecar_timestamp(chrono::Local::now());
    clips::write_sidecar(&output, &timestamp, "")?;
    Ok(output)
}

/// Mux buffered audio into the final output, degrading to video-only
/// when there is no audio or no usable muxer.
fn attach_audio_and_finalize(
    request: &ExportRequest,
    temp_video: &Path,
) -> Result<PathBuf, ExportError> {
    let mixed = match &request.audio {
        Some(buffers) => {
            let mic = audio_window(&buffers.microphone.snapshot_all(), request.duration);
            let desk = audio_window(&buffers.loopback.snapshot_all(), request.duration);
            let format = mic.first().or_else(|| desk.first()).map(|c| (c.sample_rate, c.channels));
            let samples = encoder::mix_chunks(&mic, &desk);
            format.map(|(rate, channels)| (samples, rate, channels))
        }
        None => None,
    };

    let Some((samples, sample_rate, channels)) = mixed.filter(|(s, _, _)| !s.is_empty()) else {
        move_into_place(temp_video, &request.output_path)?;
        return Ok(request.output_path.clone());
    };

    if !(request.mux.available)() {
        tracing::warn!("AAC muxer unavailable, saving video-only clip");
        let _ = request.events.send(RecorderEvent::Status(
            "audio muxer unavailable, clip saved without audio".into(),
        ));
        move_into_place(temp_video, &request.output_path)?;
        return Ok(request.output_path.clone());
    }

    // The encoded video is already safe on disk; nothing in the audio
    // stage is allowed to cost us the clip.
    let wav = match (request.mux.stage)(&samples, sample_rate, channels as u32) {
        Ok(wav) => wav,
        Err(e) => {
            tracing::warn!(error = %e, "audio staging failed, saving video-only clip");
            let _ = request.events.send(RecorderEvent::Status(format!(
                "audio staging failed, clip saved without audio: {e}"
            )));
            move_into_place(temp_video, &request.output_path)?;
            return Ok(request.output_path.clone());
        }
    };

    match (request.mux.run)(temp_video, &wav, &request.output_path) {
        Ok(()) => {
            cleanup(temp_video);
            cleanup(&wav);
            Ok(request.output_path.clone())
        }
        Err(e) => {
            // The video is intact; save it without audio rather than
            // losing the clip.
            tracing::warn!(error = %e, "mux failed, saving video-only clip");
            let _ = request.events.send(RecorderEvent::Status(format!(
                "audio mux failed, clip saved without audio: {e}"
            )));
            cleanup(&wav);
            move_into_place(temp_video, &request.output_path)?;
            Ok(request.output_path.clone())
        }
    }
}

/// Hidden temp path in the same directory as the final output, so the
/// final step is an atomic same-filesystem rename.
fn temp_video_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".into());
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{stem}.tmp.mp4"))
}

fn move_into_place(from: &Path, to: &Path) -> Result<(), ExportError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-device fallback
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)?;
            Ok(())
        }
    }
}

fn cleanup(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}
