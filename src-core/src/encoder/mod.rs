//! Encoding via the external FFmpeg binary (ffmpeg-sidecar).
//!
//! Video goes through a spawned `ffmpeg` process fed raw RGB24 frames on
//! stdin; audio is staged as a temporary WAV and muxed into the MP4 in a
//! second pass (stream copy for video, AAC for audio). Capability probes
//! run once per process and are cached.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};

use ffmpeg_sidecar::command::FfmpegCommand;
use once_cell::sync::Lazy;

use crate::audio::AudioChunk;
use crate::capture::types::Frame;
use crate::error::ExportError;

/// Resolve the path to the FFmpeg binary: a binary adjacent to our own
/// executable wins (bundled installs), otherwise PATH.
pub fn resolve_ffmpeg_path() -> PathBuf {
    let sidecar = ffmpeg_sidecar::paths::ffmpeg_path();
    if sidecar.exists() {
        sidecar
    } else {
        PathBuf::from("ffmpeg")
    }
}

fn new_ffmpeg_command() -> FfmpegCommand {
    FfmpegCommand::new_with_path(resolve_ffmpeg_path())
}

static FFMPEG_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    let ffmpeg = resolve_ffmpeg_path();
    match Command::new(&ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {
            tracing::debug!(path = %ffmpeg.display(), "ffmpeg binary verified");
            true
        }
        Ok(status) => {
            tracing::warn!(path = %ffmpeg.display(), %status, "ffmpeg probe exited nonzero");
            false
        }
        Err(e) => {
            tracing::warn!(path = %ffmpeg.display(), error = %e, "ffmpeg binary not found");
            false
        }
    }
});

static ENCODERS_OUTPUT: Lazy<String> = Lazy::new(|| {
    match Command::new(resolve_ffmpeg_path())
        .args(["-encoders", "-hide_banner"])
        .output()
    {
        Ok(o) => String::from_utf8_lossy(&o.stdout).to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to run ffmpeg -encoders");
            String::new()
        }
    }
});

static H264_ENCODER: Lazy<&'static str> = Lazy::new(|| {
    // Preference order: libx264 first, then hardware encoders. Some
    // distro builds (Fedora ffmpeg-free) ship without libx264.
    let preferences = [
        "libx264",
        "libopenh264",
        "h264_vaapi",
        "h264_nvenc",
        "h264_amf",
        "h264_qsv",
        "h264_v4l2m2m",
        "h264_vulkan",
    ];

    for name in preferences {
        if ENCODERS_OUTPUT.lines().any(|l| l.contains(name)) {
            tracing::info!(encoder = name, "selected H.264 encoder");
            return name;
        }
    }

    tracing::warn!("no H.264 encoder detected, trying libx264 anyway");
    "libx264"
});

/// Whether the FFmpeg binary is present and runs. Cached.
pub fn ffmpeg_available() -> bool {
    *FFMPEG_AVAILABLE
}

/// Whether the FFmpeg build can encode AAC for muxing. Cached.
/// When false, exports degrade to video-only instead of failing.
pub fn mux_available() -> bool {
    ffmpeg_available() && ENCODERS_OUTPUT.lines().any(|l| l.contains(" aac"))
}

/// The H.264 encoder name this FFmpeg build supports.
pub fn detect_h264_encoder() -> &'static str {
    *H264_ENCODER
}

/// Encodes raw RGB24 frames into an H.264 MP4 through an FFmpeg child
/// process.
pub struct VideoEncoder {
    stdin: Option<ChildStdin>,
    child: Option<std::process::Child>,
    stderr_tail: Arc<Mutex<Vec<String>>>,
    output_path: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    skipped_frames: u64,
}

impl VideoEncoder {
    /// Create an encoder for the given dimensions and frame rate.
    /// Dimensions are rounded down to even numbers for codec compatibility.
    pub fn new(width: u32, height: u32, fps: u32, output_path: PathBuf) -> Result<Self, ExportError> {
        let width = width & !1;
        let height = height & !1;
        if width == 0 || height == 0 {
            return Err(ExportError::Encode(format!(
                "invalid frame dimensions: {width}x{height}"
            )));
        }

        Ok(Self {
            stdin: None,
            child: None,
            stderr_tail: Arc::new(Mutex::new(Vec::new())),
            output_path,
            width,
            height,
            fps: fps.max(1),
            skipped_frames: 0,
        })
    }

    /// Start the FFmpeg child process.
    pub fn start(&mut self) -> Result<(), ExportError> {
        if !ffmpeg_available() {
            return Err(ExportError::Encode(format!(
                "ffmpeg not found at {}; install FFmpeg or bundle it next to the executable",
                resolve_ffmpeg_path().display()
            )));
        }

        let encoder = detect_h264_encoder();
        let mut command = new_ffmpeg_command();
        command
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", self.width, self.height)])
            .args(["-r", &self.fps.to_string()])
            .args(["-i", "-"])
            .args(["-c:v", encoder]);

        match encoder {
            "libx264" => {
                command.args(["-preset", "ultrafast"]).args(["-crf", "23"]);
            }
            "libopenh264" => {
                command.args(["-b:v", "2M"]);
            }
            "h264_vaapi" => {
                command.args(["-qp", "23"]);
            }
            "h264_nvenc" | "h264_amf" => {
                command
                    .args(["-preset", "p1"])
                    .args(["-rc", "vbr"])
                    .args(["-cq", "23"]);
            }
            _ => {
                tracing::debug!(encoder, "using default options");
            }
        }

        command
            .args(["-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart"])
            .args(["-y"])
            .arg(self.output_path.to_string_lossy().to_string());

        let inner = command.as_inner_mut();
        inner.stdin(Stdio::piped());
        inner.stdout(Stdio::null());
        inner.stderr(Stdio::piped());

        let mut child = inner
            .spawn()
            .map_err(|e| ExportError::Encode(format!("failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExportError::Encode("failed to open ffmpeg stdin".into()))?;

        // Drain stderr on a side thread, keeping the tail for error
        // reporting in finish().
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&self.stderr_tail);
            std::thread::spawn(move || {
                use std::io::{BufRead, BufReader};
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::trace!(target: "ffmpeg", "{line}");
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() >= 20 {
                            tail.remove(0);
                        }
                        tail.push(line);
                    }
                }
            });
        }

        self.stdin = Some(stdin);
        self.child = Some(child);
        Ok(())
    }

    /// Feed one frame. Frames whose dimensions do not match the encoder
    /// are skipped with a warning; the session's first frame fixed the
    /// geometry and mid-stream resizes are not supported.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), ExportError> {
        if frame.width & !1 != self.width || frame.height & !1 != self.height {
            self.skipped_frames += 1;
            tracing::warn!(
                frame_width = frame.width,
                frame_height = frame.height,
                encoder_width = self.width,
                encoder_height = self.height,
                skipped = self.skipped_frames,
                "skipping frame with mismatched dimensions"
            );
            return Ok(());
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ExportError::Encode("encoder not started".into()));
        };

        if frame.width == self.width && frame.height == self.height {
            stdin
                .write_all(&frame.data)
                .map_err(|e| ExportError::Encode(format!("failed to write frame: {e}")))?;
        } else {
            // Odd-dimension source: crop the excess row/column.
            let src_row = frame.width as usize * 3;
            let dst_row = self.width as usize * 3;
            for y in 0..self.height as usize {
                let start = y * src_row;
                let end = start + dst_row;
                if end <= frame.data.len() {
                    stdin
                        .write_all(&frame.data[start..end])
                        .map_err(|e| ExportError::Encode(format!("failed to write frame row: {e}")))?;
                }
            }
        }
        Ok(())
    }

    /// Path the MP4 is being written to.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Close stdin, wait for FFmpeg to finalize the file.
    pub fn finish(mut self) -> Result<PathBuf, ExportError> {
        drop(self.stdin.take());

        if let Some(mut child) = self.child.take() {
            let status = child
                .wait()
                .map_err(|e| ExportError::Encode(format!("ffmpeg process error: {e}")))?;

            if !status.success() {
                let tail = self
                    .stderr_tail
                    .lock()
                    .map(|t| t.join("\n"))
                    .unwrap_or_default();
                let msg = if tail.is_empty() {
                    format!("ffmpeg exited with status {status}")
                } else {
                    format!("ffmpeg exited with status {status}: {tail}")
                };
                return Err(ExportError::Encode(msg));
            }
        }

        if self.skipped_frames > 0 {
            tracing::warn!(count = self.skipped_frames, "frames skipped during encode");
        }
        Ok(self.output_path)
    }
}

/// Stages PCM audio as a 16-bit WAV file for the mux pass.
pub struct AudioEncoder {
    file: Option<std::fs::File>,
    output_path: PathBuf,
    sample_rate: u32,
    channels: u32,
    bytes_written: u64,
}

impl AudioEncoder {
    /// Create an encoder writing to a unique temp file.
    pub fn new(sample_rate: u32, channels: u32) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%f");
        let output_path = std::env::temp_dir().join(format!(
            "screenclips_audio_{}_{stamp}.wav",
            std::process::id()
        ));
        Self {
            file: None,
            output_path,
            sample_rate,
            channels,
            bytes_written: 0,
        }
    }

    /// Open the file and write a placeholder header; the real sizes are
    /// patched in by finish().
    pub fn start(&mut self) -> Result<(), ExportError> {
        let mut file = std::fs::File::create(&self.output_path)?;
        file.write_all(&create_wav_header(self.sample_rate, self.channels, 0))?;
        self.file = Some(file);
        Ok(())
    }

    /// Append f32 samples in [-1, 1] as 16-bit PCM.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<(), ExportError> {
        if let Some(file) = self.file.as_mut() {
            let pcm: Vec<u8> = samples
                .iter()
                .flat_map(|&s| {
                    let value = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                    value.to_le_bytes()
                })
                .collect();
            file.write_all(&pcm)?;
            self.bytes_written += pcm.len() as u64;
        }
        Ok(())
    }

    /// Number of PCM bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Rewrite the header with the final sizes and return the path.
    pub fn finish(mut self) -> Result<PathBuf, ExportError> {
        if let Some(mut file) = self.file.take() {
            use std::io::Seek;
            file.seek(std::io::SeekFrom::Start(0))?;
            file.write_all(&create_wav_header(
                self.sample_rate,
                self.channels,
                self.bytes_written as u32,
            ))?;
        }
        Ok(self.output_path)
    }

    /// Path of the temp WAV (for cleanup on abandoned exports).
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// 44-byte canonical RIFF/WAVE header for 16-bit PCM.
fn create_wav_header(sample_rate: u32, channels: u32, data_size: u32) -> Vec<u8> {
    let byte_rate = sample_rate * channels * 2;
    let block_align = channels * 2;
    let file_size = 36 + data_size;

    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&file_size.to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&(channels as u16).to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&(block_align as u16).to_le_bytes());
    header.extend_from_slice(&16u16.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_size.to_le_bytes());
    header
}

/// Mix microphone and desktop chunk streams into one interleaved f32
/// sample vector.
///
/// Both sources are concatenated in buffer order. When both are present
/// each is attenuated to 0.7 and the sum is clamped to [-1, 1]; a single
/// surviving source passes through unscaled. No resampling is performed;
/// sources are mixed sample-for-sample.
pub fn mix_chunks(microphone: &[AudioChunk], desktop: &[AudioChunk]) -> Vec<f32> {
    let mic: Vec<f32> = microphone
        .iter()
        .flat_map(|c| c.samples.iter().copied())
        .collect();
    let desk: Vec<f32> = desktop
        .iter()
        .flat_map(|c| c.samples.iter().copied())
        .collect();

    match (mic.is_empty(), desk.is_empty()) {
        (true, true) => Vec::new(),
        (false, true) => mic,
        (true, false) => desk,
        (false, false) => {
            let len = mic.len().max(desk.len());
            (0..len)
                .map(|i| {
                    let a = mic.get(i).copied().unwrap_or(0.0);
                    let b = desk.get(i).copied().unwrap_or(0.0);
                    (a * 0.7 + b * 0.7).clamp(-1.0, 1.0)
                })
                .collect()
        }
    }
}

/// Mux a video file and a WAV file into `output_path`: video stream
/// copied, audio transcoded to AAC, container truncated to the shorter
/// stream.
pub fn mux_audio_video(
    video_path: &Path,
    audio_path: &Path,
    output_path: &Path,
) -> Result<(), ExportError> {
    let mut command = new_ffmpeg_command();
    command
        .args(["-i", video_path.to_string_lossy().as_ref()])
        .args(["-i", audio_path.to_string_lossy().as_ref()])
        .args(["-c:v", "copy"])
        .args(["-c:a", "aac"])
        .args(["-b:a", "192k"])
        .args(["-map", "0:v"])
        .args(["-map", "1:a"])
        .args(["-shortest"])
        .args(["-movflags", "+faststart"])
        .args(["-y"])
        .arg(output_path.to_string_lossy().to_string());

    let inner = command.as_inner_mut();
    inner.stdout(Stdio::null());
    inner.stderr(Stdio::piped());

    let mut child = inner
        .spawn()
        .map_err(|e| ExportError::Mux(format!("failed to start ffmpeg for muxing: {e}")))?;

    let stderr_output = if let Some(mut stderr) = child.stderr.take() {
        use std::io::Read;
        let mut out = String::new();
        let _ = stderr.read_to_string(&mut out);
        out
    } else {
        String::new()
    };

    let status = child
        .wait()
        .map_err(|e| ExportError::Mux(format!("ffmpeg mux process error: {e}")))?;

    if !status.success() {
        let last = stderr_output.lines().last().unwrap_or("").to_string();
        return Err(ExportError::Mux(if last.is_empty() {
            format!("ffmpeg muxing exited with status {status}")
        } else {
            format!("ffmpeg muxing failed: {last}")
        }));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSourceKind;
    use std::time::Instant;

    fn chunk(samples: Vec<f32>, source: AudioSourceKind) -> AudioChunk {
        AudioChunk {
            samples,
            channels: 1,
            sample_rate: 48_000,
            captured_at: Instant::now(),
            source,
        }
    }

    #[test]
    fn wav_header_layout() {
        let header = create_wav_header(48_000, 2, 1000);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
        // file size = 36 + data size
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 1036);
        // channels
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), 2);
        // sample rate
        assert_eq!(
            u32::from_le_bytes(header[24..28].try_into().unwrap()),
            48_000
        );
        // byte rate = rate * channels * 2
        assert_eq!(
            u32::from_le_bytes(header[28..32].try_into().unwrap()),
            192_000
        );
        // data size
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn mix_two_sources_attenuates_and_clamps() {
        let mic = [chunk(vec![1.0, 0.5], AudioSourceKind::Microphone)];
        let desk = [chunk(vec![1.0, -0.5], AudioSourceKind::DesktopLoopback)];
        let mixed = mix_chunks(&mic, &desk);
        assert_eq!(mixed.len(), 2);
        // 0.7 + 0.7 = 1.4, clamped
        assert_eq!(mixed[0], 1.0);
        assert!((mixed[1] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn mix_single_source_passes_through() {
        let mic = [chunk(vec![0.25, -0.25], AudioSourceKind::Microphone)];
        assert_eq!(mix_chunks(&mic, &[]), vec![0.25, -0.25]);
        let desk = [chunk(vec![0.5], AudioSourceKind::DesktopLoopback)];
        assert_eq!(mix_chunks(&[], &desk), vec![0.5]);
    }

    #[test]
    fn mix_uneven_lengths_zero_pads_the_shorter() {
        let mic = [chunk(vec![1.0], AudioSourceKind::Microphone)];
        let desk = [chunk(vec![0.0, 1.0], AudioSourceKind::DesktopLoopback)];
        let mixed = mix_chunks(&mic, &desk);
        assert_eq!(mixed.len(), 2);
        assert!((mixed[0] - 0.7).abs() < 1e-6);
        assert!((mixed[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn mix_empty_is_empty() {
        assert!(mix_chunks(&[], &[]).is_empty());
    }

    #[test]
    fn audio_encoder_roundtrip_on_disk() {
        let mut enc = AudioEncoder::new(48_000, 2);
        enc.start().unwrap();
        enc.write_samples(&[0.0, 0.5, -0.5, 1.0]).unwrap();
        assert_eq!(enc.bytes_written(), 8);
        let path = enc.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44 + 8);
        // header was patched with the real data size
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 8);
        // full-scale sample clamps to i16::MAX
        assert_eq!(i16::from_le_bytes(bytes[50..52].try_into().unwrap()), 32767);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn invalid_dimensions_rejected() {
        let err = VideoEncoder::new(0, 1080, 30, PathBuf::from("/tmp/x.mp4"));
        assert!(err.is_err());
        // 1x1 rounds down to 0x0
        let err = VideoEncoder::new(1, 1, 30, PathBuf::from("/tmp/x.mp4"));
        assert!(err.is_err());
    }

    #[test]
    #[ignore = "requires ffmpeg"]
    fn encode_a_short_clip() {
        let out = std::env::temp_dir().join(format!("screenclips_test_{}.mp4", std::process::id()));
        let mut enc = VideoEncoder::new(64, 64, 30, out.clone()).unwrap();
        enc.start().unwrap();
        for i in 0..30u8 {
            let frame = Frame {
                width: 64,
                height: 64,
                data: vec![i; 64 * 64 * 3],
                captured_at: Instant::now(),
            };
            enc.write_frame(&frame).unwrap();
        }
        let path = enc.finish().unwrap();
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }
}
