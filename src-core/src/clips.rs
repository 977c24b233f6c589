//! Clip library: sidecar metadata and file management.
//!
//! Every exported clip gets a plain-text sidecar next to it with the
//! same stem and a `.meta` extension:
//!
//! ```text
//! timestamp=2026-08-25 14:03:07
//! name=boss kill
//! ```
//!
//! Parsing is deliberately tolerant: lines split on the first `=`,
//! malformed lines and unknown keys are ignored, a missing sidecar
//! yields empty metadata. Renaming a clip only rewrites the sidecar.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// One clip on disk with its parsed sidecar metadata.
#[derive(Debug, Clone)]
pub struct ClipRecord {
    /// Path to the video file.
    pub path: PathBuf,
    /// Human-readable creation timestamp from the sidecar, or empty.
    pub timestamp: String,
    /// User-assigned label from the sidecar, or empty.
    pub name: String,
}

impl ClipRecord {
    /// Label shown in clip lists: the user's name if set, otherwise a
    /// timestamp-derived fallback, otherwise the file stem.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        if !self.timestamp.is_empty() {
            return format!("Clip - {}", self.timestamp);
        }
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Sidecar path for a video file (same stem, `.meta` extension).
pub fn sidecar_path(video: &Path) -> PathBuf {
    video.with_extension("meta")
}

/// Parse sidecar contents into `(timestamp, name)`.
fn parse_sidecar(contents: &str) -> (String, String) {
    let mut timestamp = String::new();
    let mut name = String::new();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "timestamp" => timestamp = value.trim().to_string(),
            "name" => name = value.trim().to_string(),
            _ => {}
        }
    }
    (timestamp, name)
}

/// Read the sidecar for a video. Missing or unreadable sidecars yield
/// empty metadata rather than an error.
pub fn read_sidecar(video: &Path) -> (String, String) {
    match fs::read_to_string(sidecar_path(video)) {
        Ok(contents) => parse_sidecar(&contents),
        Err(_) => (String::new(), String::new()),
    }
}

/// Write (or overwrite) the sidecar for a video.
pub fn write_sidecar(video: &Path, timestamp: &str, name: &str) -> io::Result<()> {
    fs::write(
        sidecar_path(video),
        format!("timestamp={timestamp}\nname={name}\n"),
    )
}

/// Human-readable timestamp used in new sidecars.
pub fn sidecar_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Pick a path for the next clip in `dir`, `clip_YYYYmmdd_HHMMSS.mp4`,
/// suffixing a counter on collision.
pub fn next_clip_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = format!("clip_{}", now.format("%Y%m%d_%H%M%S"));
    let candidate = dir.join(format!("{stem}.mp4"));
    if !candidate.exists() {
        return candidate;
    }
    for i in 1.. {
        let candidate = dir.join(format!("{stem}_{i}.mp4"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// Enumerate clips in `dir`, newest first by modification time.
/// Hidden files (in-flight temp outputs) are skipped.
pub fn list_clips(dir: &Path) -> io::Result<Vec<ClipRecord>> {
    let mut clips = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || !name.ends_with(".mp4") {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified()).ok();
        let (timestamp, label) = read_sidecar(&path);
        clips.push((
            modified,
            ClipRecord {
                path,
                timestamp,
                name: label,
            },
        ));
    }
    clips.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(clips.into_iter().map(|(_, record)| record).collect())
}

/// Rewrite the sidecar with a new label, preserving the recorded
/// timestamp. An empty name clears the label.
pub fn rename_clip(video: &Path, new_name: &str) -> io::Result<()> {
    let (timestamp, _) = read_sidecar(video);
    write_sidecar(video, &timestamp, new_name)
}

/// Delete a clip and its sidecar together. A missing sidecar is not an
/// error.
pub fn delete_clip(video: &Path) -> io::Result<()> {
    fs::remove_file(video)?;
    match fs::remove_file(sidecar_path(video)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "screenclips_clips_{tag}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parse_is_tolerant() {
        let (ts, name) = parse_sidecar("timestamp=2026-01-02 03:04:05\nname=demo\n");
        assert_eq!(ts, "2026-01-02 03:04:05");
        assert_eq!(name, "demo");

        // malformed line, unknown key, missing name
        let (ts, name) = parse_sidecar("garbage\nfoo=bar\ntimestamp=t\n");
        assert_eq!(ts, "t");
        assert_eq!(name, "");

        // value containing '=' splits only on the first
        let (_, name) = parse_sidecar("name=a=b\n");
        assert_eq!(name, "a=b");
    }

    #[test]
    fn missing_sidecar_yields_empty_metadata() {
        let dir = temp_dir("missing");
        let video = dir.join("clip.mp4");
        assert_eq!(read_sidecar(&video), (String::new(), String::new()));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = temp_dir("roundtrip");
        let video = dir.join("clip_20260825_140307.mp4");
        write_sidecar(&video, "2026-08-25 14:03:07", "").unwrap();
        let (ts, name) = read_sidecar(&video);
        assert_eq!(ts, "2026-08-25 14:03:07");
        assert_eq!(name, "");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn rename_preserves_timestamp() {
        let dir = temp_dir("rename");
        let video = dir.join("clip.mp4");
        write_sidecar(&video, "2026-08-25 14:03:07", "old").unwrap();
        rename_clip(&video, "new label").unwrap();
        let (ts, name) = read_sidecar(&video);
        assert_eq!(ts, "2026-08-25 14:03:07");
        assert_eq!(name, "new label");

        // empty name clears the label
        rename_clip(&video, "").unwrap();
        let (ts, name) = read_sidecar(&video);
        assert_eq!(ts, "2026-08-25 14:03:07");
        assert_eq!(name, "");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn delete_removes_both_files() {
        let dir = temp_dir("delete");
        let video = dir.join("clip.mp4");
        fs::write(&video, b"video").unwrap();
        write_sidecar(&video, "t", "n").unwrap();
        delete_clip(&video).unwrap();
        assert!(!video.exists());
        assert!(!sidecar_path(&video).exists());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn delete_without_sidecar_succeeds() {
        let dir = temp_dir("nosidecar");
        let video = dir.join("clip.mp4");
        fs::write(&video, b"video").unwrap();
        delete_clip(&video).unwrap();
        assert!(!video.exists());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn list_skips_hidden_and_non_mp4() {
        let dir = temp_dir("list");
        fs::write(dir.join("a.mp4"), b"a").unwrap();
        fs::write(dir.join(".b.tmp.mp4"), b"b").unwrap();
        fs::write(dir.join("c.meta"), b"timestamp=t\n").unwrap();
        let clips = list_clips(&dir).unwrap();
        assert_eq!(clips.len(), 1);
        assert!(clips[0].path.ends_with("a.mp4"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn display_name_fallbacks() {
        let record = ClipRecord {
            path: PathBuf::from("/x/clip_1.mp4"),
            timestamp: String::new(),
            name: String::new(),
        };
        assert_eq!(record.display_name(), "clip_1");

        let record = ClipRecord {
            timestamp: "2026-08-25 14:03:07".into(),
            ..record
        };
        assert_eq!(record.display_name(), "Clip - 2026-08-25 14:03:07");

        let record = ClipRecord {
            name: "boss kill".into(),
            ..record
        };
        assert_eq!(record.display_name(), "boss kill");
    }

    #[test]
    fn next_clip_path_dedupes_collisions() {
        let dir = temp_dir("nextpath");
        let now = Local.with_ymd_and_hms(2026, 8, 25, 14, 3, 7).unwrap();
        let first = next_clip_path(&dir, now);
        assert!(first.ends_with("clip_20260825_140307.mp4"));
        fs::write(&first, b"x").unwrap();
        let second = next_clip_path(&dir, now);
        assert!(second.ends_with("clip_20260825_140307_1.mp4"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn sidecar_timestamp_format() {
        let now = Local.with_ymd_and_hms(2026, 8, 25, 14, 3, 7).unwrap();
        assert_eq!(sidecar_timestamp(now), "2026-08-25 14:03:07");
    }
}
