//! Audio capture.
//!
//! Up to two CPAL input streams run per session: a microphone and a
//! desktop loopback/monitor device. Stream callbacks convert samples to
//! f32 and append fixed chunks to lock-protected ring buffers; they never
//! block on anything else. A source that fails to open is skipped with a
//! warning, so video capture proceeds with whatever audio survived.
//!
//! `cpal::Stream` is not `Send`, so the streams live on a dedicated
//! holder thread that parks on a stop channel and drops them on the way
//! out.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::buffer::RingBuffer;
use crate::error::AudioError;

/// Role of an audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSourceKind {
    /// A microphone or other real input device.
    Microphone,
    /// A monitor/loopback device that carries desktop playback.
    DesktopLoopback,
}

impl AudioSourceKind {
    fn role(self) -> &'static str {
        match self {
            AudioSourceKind::Microphone => "microphone",
            AudioSourceKind::DesktopLoopback => "desktop loopback",
        }
    }
}

/// A selectable audio device.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Device name as reported by the backend; doubles as the id used in
    /// configuration.
    pub name: String,
    /// Which role this device was matched for.
    pub kind: AudioSourceKind,
}

/// One callback's worth of captured audio.
#[derive(Clone)]
pub struct AudioChunk {
    /// Interleaved f32 samples in [-1, 1].
    pub samples: Vec<f32>,
    /// Channel count of the stream that produced this chunk.
    pub channels: u16,
    /// Sample rate of the stream that produced this chunk.
    pub sample_rate: u32,
    /// Monotonic timestamp taken in the callback.
    pub captured_at: Instant,
    /// Which source produced this chunk.
    pub source: AudioSourceKind,
}

impl AudioChunk {
    /// Wall-clock duration this chunk covers.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}

/// Per-source chunk ring buffers shared with the export pipeline.
#[derive(Clone)]
pub struct AudioBuffers {
    /// Microphone chunks, oldest first.
    pub microphone: Arc<RingBuffer<AudioChunk>>,
    /// Desktop loopback chunks, oldest first.
    pub loopback: Arc<RingBuffer<AudioChunk>>,
}

impl AudioBuffers {
    /// Create empty buffers each holding at most `chunk_capacity` chunks.
    pub fn new(chunk_capacity: usize) -> Self {
        Self {
            microphone: Arc::new(RingBuffer::new(chunk_capacity)),
            loopback: Arc::new(RingBuffer::new(chunk_capacity)),
        }
    }
}

/// Monitor/loopback devices expose themselves as input devices with
/// telltale names; there is no portable capability flag for it.
fn looks_like_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["monitor", "loopback", "stereo mix", "blackhole", "soundflower"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn matches_kind(name: &str, kind: AudioSourceKind) -> bool {
    match kind {
        AudioSourceKind::DesktopLoopback => looks_like_loopback(name),
        AudioSourceKind::Microphone => !looks_like_loopback(name),
    }
}

/// Selection rule for one stream: an explicitly configured name is
/// taken verbatim (the user knows better than the marker heuristic,
/// e.g. aggregate devices named freely); the heuristic only steers the
/// auto-pick path.
fn device_matches(name: &str, requested: Option<&str>, kind: AudioSourceKind) -> bool {
    match requested {
        Some(wanted) => name == wanted,
        None => matches_kind(name, kind),
    }
}

/// Enumerate input devices that fit the given role.
pub fn list_candidate_devices(kind: AudioSourceKind) -> Result<Vec<DeviceDescriptor>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Backend(e.to_string()))?;

    let mut found = Vec::new();
    for device in devices {
        let name = match device.name() {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unnamed audio device");
                continue;
            }
        };
        if matches_kind(&name, kind) {
            found.push(DeviceDescriptor { name, kind });
        }
    }
    Ok(found)
}

/// A running audio capture session.
///
/// Dropping the session stops every stream it opened.
pub struct AudioCaptureSession {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    buffers: AudioBuffers,
    opened: Vec<DeviceDescriptor>,
}

impl AudioCaptureSession {
    /// Open streams for the requested devices and start capturing.
    ///
    /// `microphone` and `loopback` are device names from configuration;
    /// `None` picks the first candidate for the role. Open failures are
    /// logged and skipped, so the session may end up with zero sources.
    pub fn start(
        microphone: Option<String>,
        loopback: Option<String>,
        chunk_capacity: usize,
    ) -> Self {
        let buffers = AudioBuffers::new(chunk_capacity);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Vec<DeviceDescriptor>>();

        let thread = {
            let buffers = buffers.clone();
            std::thread::spawn(move || {
                let mut streams = Vec::new();
                let mut opened = Vec::new();

                let requests = [
                    (
                        AudioSourceKind::Microphone,
                        microphone,
                        Arc::clone(&buffers.microphone),
                    ),
                    (
                        AudioSourceKind::DesktopLoopback,
                        loopback,
                        Arc::clone(&buffers.loopback),
                    ),
                ];

                for (kind, requested, buffer) in requests {
                    match open_stream(kind, requested.as_deref(), buffer) {
                        Ok((stream, descriptor)) => {
                            tracing::info!(device = %descriptor.name, role = kind.role(), "audio stream opened");
                            streams.push(stream);
                            opened.push(descriptor);
                        }
                        Err(e) => {
                            tracing::warn!(role = kind.role(), error = %e, "audio source skipped");
                        }
                    }
                }

                let _ = ready_tx.send(opened);

                // Park until stop() drops or signals the channel.
                let _ = stop_rx.recv();
                drop(streams);
                tracing::debug!("audio holder thread exiting");
            })
        };

        let opened = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_default();

        Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            buffers,
            opened,
        }
    }

    /// Buffers the session's callbacks append into.
    pub fn buffers(&self) -> &AudioBuffers {
        &self.buffers
    }

    /// Devices that actually opened, in role order.
    pub fn opened_devices(&self) -> &[DeviceDescriptor] {
        &self.opened
    }

    /// True when no source survived opening.
    pub fn is_silent(&self) -> bool {
        self.opened.is_empty()
    }

    /// Stop all streams. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
            drop(tx);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open one input stream for `kind`, preferring the device named in
/// `requested`, and wire its callback to push into `buffer`.
fn open_stream(
    kind: AudioSourceKind,
    requested: Option<&str>,
    buffer: Arc<RingBuffer<AudioChunk>>,
) -> Result<(cpal::Stream, DeviceDescriptor), AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Backend(e.to_string()))?;

    let mut selected = None;
    for device in devices {
        let Ok(name) = device.name() else { continue };
        if device_matches(&name, requested, kind) {
            selected = Some((device, name));
            break;
        }
    }

    let (device, name) = match (selected, requested) {
        (Some(found), _) => found,
        (None, Some(wanted)) => {
            return Err(AudioError::DeviceNotFound {
                name: wanted.to_string(),
            })
        }
        (None, None) => return Err(AudioError::NoDevice { role: kind.role() }),
    };

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Backend(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels;
    let sample_rate = config.sample_rate.0;

    let err_fn = move |e: cpal::StreamError| {
        tracing::error!(error = %e, "audio stream error");
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            let buffer = Arc::clone(&buffer);
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        buffer.push(AudioChunk {
                            samples: data.to_vec(),
                            channels,
                            sample_rate,
                            captured_at: Instant::now(),
                            source: kind,
                        });
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::Backend(e.to_string()))?
        }
        cpal::SampleFormat::I16 => {
            let buffer = Arc::clone(&buffer);
            device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let samples = data.iter().map(|&s| s as f32 / 32768.0).collect();
                        buffer.push(AudioChunk {
                            samples,
                            channels,
                            sample_rate,
                            captured_at: Instant::now(),
                            source: kind,
                        });
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::Backend(e.to_string()))?
        }
        other => {
            return Err(AudioError::UnsupportedFormat {
                format: format!("{other:?}"),
            })
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::Backend(e.to_string()))?;

    Ok((stream, DeviceDescriptor { name, kind }))
}
