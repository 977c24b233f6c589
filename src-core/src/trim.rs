//! Trim pipeline.
//!
//! Decodes the source clip back to raw frames through an FFmpeg pipe,
//! re-encodes the inclusive `[start_frame, end_frame]` range into a new
//! file, and writes a sidecar marking it trimmed. The source is left
//! untouched. If any frame inside the range cannot be read, the whole
//! trim fails with the index of the first gap instead of silently
//! producing a shorter clip.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::FfmpegEvent;

use crate::capture::types::Frame;
use crate::clips;
use crate::encoder::{resolve_ffmpeg_path, VideoEncoder};
use crate::error::{ExportError, TrimError};

/// Used when the source's frame rate cannot be parsed from the decoder.
const FALLBACK_FPS: u32 = 30;

/// Re-encode frames `start_frame..=end_frame` of `source` into a new
/// `<stem>_trimmed.mp4` next to it. Returns the output path.
pub fn trim_clip(source: &Path, start_frame: u64, end_frame: u64) -> Result<PathBuf, TrimError> {
    validate(source, start_frame, end_frame)?;
    let output = planned_output_path(source);
    trim_clip_to(source, start_frame, end_frame, &output)?;
    Ok(output)
}

/// Range and source checks shared by the sync and worker entry points.
pub(crate) fn validate(source: &Path, start_frame: u64, end_frame: u64) -> Result<(), TrimError> {
    if start_frame >= end_frame {
        return Err(TrimError::InvalidRange {
            start: start_frame,
            end: end_frame,
        });
    }
    if !source.is_file() {
        return Err(TrimError::SourceNotFound {
            path: source.to_path_buf(),
        });
    }
    Ok(())
}

/// Trim into a caller-chosen output path.
pub(crate) fn trim_clip_to(
    source: &Path,
    start_frame: u64,
    end_frame: u64,
    output: &Path,
) -> Result<(), TrimError> {
    validate(source, start_frame, end_frame)?;
    let temp = output.with_file_name(format!(
        ".{}.tmp.mp4",
        output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trim".into())
    ));

    tracing::info!(
        source = %source.display(),
        start_frame,
        end_frame,
        "trimming clip"
    );

    let result = decode_and_reencode(source, start_frame, end_frame, &temp);
    match result {
        Ok(()) => {
            std::fs::rename(&temp, output)?;
            let timestamp = clips::sidecar_timestamp(chrono::Local::now());
            clips::write_sidecar(output, &timestamp, "(Trimmed)")?;
            tracing::info!(output = %output.display(), "trim complete");
            Ok(())
        }
        Err(e) => {
            if temp.exists() {
                let _ = std::fs::remove_file(&temp);
            }
            Err(e)
        }
    }
}

fn decode_and_reencode(
    source: &Path,
    start_frame: u64,
    end_frame: u64,
    temp: &Path,
) -> Result<(), TrimError> {
    let mut command = FfmpegCommand::new_with_path(resolve_ffmpeg_path());
    command
        .input(source.to_string_lossy().as_ref())
        .args(["-an"])
        .rawvideo();

    let mut child = command
        .spawn()
        .map_err(|e| TrimError::Decode(e.to_string()))?;
    let iter = child.iter().map_err(|e| TrimError::Decode(e.to_string()))?;

    let mut fps = 0u32;
    let mut encoder: Option<VideoEncoder> = None;
    let mut written = 0u64;
    let expected = end_frame - start_frame + 1;

    for event in iter {
        match event {
            FfmpegEvent::ParsedInputStream(stream) => {
                if let Some(video) = stream.video_data() {
                    fps = video.fps.round() as u32;
                }
            }
            FfmpegEvent::OutputFrame(raw) => {
                let index = raw.frame_num as u64;
                if index < start_frame {
                    continue;
                }
                if index > end_frame {
                    break;
                }

                let frame = Frame {
                    width: raw.width,
                    height: raw.height,
                    data: raw.data,
                    captured_at: Instant::now(),
                };

                if encoder.is_none() {
                    if fps == 0 {
                        tracing::warn!(
                            fallback = FALLBACK_FPS,
                            "source frame rate not reported, using fallback"
                        );
                        fps = FALLBACK_FPS;
                    }
                    let mut enc =
                        VideoEncoder::new(frame.width, frame.height, fps, temp.to_path_buf())
                            .map_err(map_encode)?;
                    enc.start().map_err(map_encode)?;
                    encoder = Some(enc);
                }
                if let Some(enc) = encoder.as_mut() {
                    enc.write_frame(&frame).map_err(map_encode)?;
                    written += 1;
                }
            }
            FfmpegEvent::Error(e) => {
                tracing::warn!("decoder: {e}");
            }
            _ => {}
        }
        if written == expected {
            break;
        }
    }

    // The decoder may still be running if we broke out early.
    let _ = child.kill();
    let _ = child.wait();

    if written < expected {
        if let Some(enc) = encoder.take() {
            let _ = enc.finish();
        }
        return Err(TrimError::SeekOrRead {
            frame: start_frame + written,
        });
    }

    match encoder.take() {
        Some(enc) => {
            enc.finish().map_err(map_encode)?;
            Ok(())
        }
        None => Err(TrimError::SeekOrRead { frame: start_frame }),
    }
}

fn map_encode(e: ExportError) -> TrimError {
    match e {
        ExportError::Io(e) => TrimError::Io(e),
        other => TrimError::Encode(other.to_string()),
    }
}

/// `<stem>_trimmed.mp4` next to the source, suffixing a counter on
/// collision.
pub(crate) fn planned_output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".into());
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let candidate = dir.join(format!("{stem}_trimmed.mp4"));
    if !candidate.exists() {
        return candidate;
    }
    for i in 1.. {
        let candidate = dir.join(format!("{stem}_trimmed_{i}.mp4"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_and_empty_ranges() {
        let source = Path::new("/nonexistent/clip.mp4");
        assert!(matches!(
            trim_clip(source, 10, 5),
            Err(TrimError::InvalidRange { start: 10, end: 5 })
        ));
        assert!(matches!(
            trim_clip(source, 5, 5),
            Err(TrimError::InvalidRange { .. })
        ));
    }

    #[test]
    fn rejects_missing_source() {
        let source = std::env::temp_dir().join("screenclips_no_such_clip.mp4");
        assert!(matches!(
            trim_clip(&source, 0, 10),
            Err(TrimError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn trimmed_path_next_to_source() {
        let out = planned_output_path(Path::new("/clips/clip_20260825_140307.mp4"));
        assert_eq!(
            out,
            PathBuf::from("/clips/clip_20260825_140307_trimmed.mp4")
        );
    }

    #[test]
    #[ignore = "requires ffmpeg"]
    fn trim_roundtrip() {
        use crate::buffer::RingBuffer;
        use std::sync::Arc;
        use std::time::Duration;

        let dir = std::env::temp_dir().join(format!("screenclips_trim_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        // Produce a 2 second source clip first.
        let buffer = Arc::new(RingBuffer::new(128));
        for i in 0..60u8 {
            buffer.push(Frame {
                width: 64,
                height: 64,
                data: vec![i.wrapping_mul(4); 64 * 64 * 3],
                captured_at: Instant::now(),
            });
        }
        let source = dir.join("source.mp4");
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        crate::export::spawn_export(crate::export::ExportRequest {
            frames: buffer,
            audio: None,
            duration: Duration::from_secs(2),
            fps: 30,
            output_path: source.clone(),
            events: tx,
            mux: crate::export::MuxBackend::default(),
        })
        .join()
        .unwrap();
        assert!(source.exists());

        let trimmed = trim_clip(&source, 10, 29).unwrap();
        assert!(trimmed.exists());
        let (_, name) = clips::read_sidecar(&trimmed);
        assert_eq!(name, "(Trimmed)");

        // Range past the end of the source fails with the first gap.
        match trim_clip(&source, 50, 500) {
            Err(TrimError::SeekOrRead { frame }) => assert!(frame >= 50),
            other => panic!("unexpected result: {other:?}"),
        }

        std::fs::remove_dir_all(dir).unwrap();
    }
}
