//! Post-processing: splices a room's per-producer export files into one
//! composite timeline (spec.md §4.F), triggered by `room-closed` when the
//! room accumulated at least one recording session.

use crate::collaborators::RecordingSink;
use crate::error::RecordingError;
use crate::graph::room::Room;
use crate::graph::RtpKind;
use rcc_config::RecordingSettings;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub duration_ms: i64,
    pub start_ms: i64,
    pub audio_channels: Option<u32>,
}

impl ProbeResult {
    fn is_plausible(&self) -> bool {
        self.duration_ms > 0
    }
}

#[derive(Debug, Clone)]
pub struct FileSpan {
    pub path: PathBuf,
    pub user_id: String,
    pub kind: RtpKind,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub start_ms: i64,
    pub end_ms: i64,
    /// Indices into the originating `Vec<FileSpan>` active during this
    /// segment.
    pub members: Vec<usize>,
}

/// Parses `<relative-ms>-<user-id>-<a|v>.webm` (spec.md §4.F).
fn parse_filename(path: &Path) -> Option<(u64, String, RtpKind)> {
    let stem = path.file_stem()?.to_str()?;
    let (rest, tag) = stem.rsplit_once('-')?;
    let (relative_ms, user_id) = rest.split_once('-')?;
    let kind = match tag {
        "a" => RtpKind::Audio,
        "v" => RtpKind::Video,
        _ => return None,
    };
    Some((relative_ms.parse().ok()?, user_id.to_string(), kind))
}

pub async fn collect_files(room_dir: &Path) -> Result<Vec<PathBuf>, RecordingError> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(room_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("webm") && parse_filename(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Probes one file with `ffprobe`, extracting duration, start time and
/// audio channel count.
pub async fn probe_file(path: &Path) -> Result<ProbeResult, RecordingError> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await?;

    let parsed: Value = serde_json::from_slice(&output.stdout).unwrap_or(Value::Null);
    let format = &parsed["format"];
    let duration_ms = format["duration"].as_str().and_then(|s| s.parse::<f64>().ok()).map(|s| (s * 1000.0) as i64).unwrap_or(0);
    let start_ms = format["start_time"].as_str().and_then(|s| s.parse::<f64>().ok()).map(|s| (s * 1000.0) as i64).unwrap_or(0);

    let audio_channels = parsed["streams"]
        .as_array()
        .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "audio"))
        .and_then(|s| s["channels"].as_u64())
        .map(|c| c as u32);

    Ok(ProbeResult { duration_ms, start_ms, audio_channels })
}

/// Remuxes a file that probed with no streams or an implausible duration,
/// tolerating timestamp damage (spec.md §4.F step 2).
pub async fn repair_file(path: &Path) -> Result<(), RecordingError> {
    let tmp = path.with_extension("repair.webm");
    let status = Command::new("ffmpeg")
        .args(["-y", "-fflags", "genpts+ignore_err", "-i"])
        .arg(path)
        .args(["-c", "copy"])
        .arg(&tmp)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        tokio::fs::rename(&tmp, path).await?;
    } else {
        warn!(path = %path.display(), "repair remux failed, leaving file as-is");
        tokio::fs::remove_file(&tmp).await.ok();
    }
    Ok(())
}

/// Builds the ordered list of file spans, probing (and repairing, if
/// needed) every file first.
pub async fn build_spans(files: &[PathBuf]) -> Result<Vec<FileSpan>, RecordingError> {
    let mut spans = Vec::with_capacity(files.len());
    for path in files {
        let Some((relative_ms, user_id, kind)) = parse_filename(path) else { continue };
        let mut probe = probe_file(path).await?;
        if !probe.is_plausible() {
            repair_file(path).await?;
            probe = probe_file(path).await?;
        }
        let start_ms = relative_ms as i64;
        spans.push(FileSpan { path: path.clone(), user_id, kind, start_ms, end_ms: start_ms + probe.duration_ms.max(0) });
    }
    Ok(spans)
}

/// Sorted, deduplicated start/end boundaries across all spans.
fn change_points(spans: &[FileSpan]) -> Vec<i64> {
    let mut points: Vec<i64> = spans.iter().flat_map(|s| [s.start_ms, s.end_ms]).collect();
    points.sort_unstable();
    points.dedup();
    points
}

/// Scans the change points left to right, deriving segments with their
/// active-file membership (spec.md §4.F step 3).
pub fn build_segments(spans: &[FileSpan]) -> Vec<Segment> {
    let points = change_points(spans);
    let mut segments = Vec::new();
    for window in points.windows(2) {
        let (start_ms, end_ms) = (window[0], window[1]);
        if start_ms == end_ms {
            continue;
        }
        let members: Vec<usize> = spans
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start_ms <= start_ms && s.end_ms >= end_ms)
            .map(|(i, _)| i)
            .collect();
        if !members.is_empty() {
            segments.push(Segment { start_ms, end_ms, members });
        }
    }
    segments
}

/// `xx = ceil(sqrt(n))`, `yy = xx` unless `n < 4`, in which case `yy = 1`
/// (spec.md §4.F step 4).
pub fn grid_layout(n: usize) -> (u32, u32) {
    if n == 0 {
        return (0, 0);
    }
    let xx = (n as f64).sqrt().ceil() as u32;
    let yy = if n < 4 { 1 } else { xx };
    (xx, yy)
}

/// Emits a filter-graph specification string for the external media
/// processor: per-segment background, per-video trim+scale+overlay, the
/// audio downmix, and the final concatenation (spec.md §4.F step 5). This
/// is a textual description consumed by the configured processor binary,
/// not a literal ffmpeg `-filter_complex` string — the processor's exact
/// filter dialect is outside this crate's scope.
pub fn build_filter_spec(spans: &[FileSpan], segments: &[Segment]) -> String {
    let mut out = String::new();
    for (seg_idx, segment) in segments.iter().enumerate() {
        let (xx, yy) = grid_layout(segment.members.len());
        out.push_str(&format!(
            "segment {seg_idx} [{}..{}] grid={xx}x{yy} background=color\n",
            segment.start_ms, segment.end_ms
        ));
        for (cell, &member) in segment.members.iter().enumerate() {
            let span = &spans[member];
            match span.kind {
                RtpKind::Video => out.push_str(&format!(
                    "  cell {cell}: video trim={}:{} scale overlay user={}\n",
                    segment.start_ms - span.start_ms,
                    segment.end_ms - span.start_ms,
                    span.user_id
                )),
                RtpKind::Audio => out.push_str(&format!(
                    "  cell {cell}: audio atrim={}:{} asetpts user={}\n",
                    segment.start_ms - span.start_ms,
                    segment.end_ms - span.start_ms,
                    span.user_id
                )),
            }
        }
    }
    let audio_sources: Vec<&str> = spans.iter().filter(|s| s.kind == RtpKind::Audio).map(|s| s.user_id.as_str()).collect();
    out.push_str(&format!("audio: amerge inputs={} pan downmix\n", audio_sources.len()));
    out.push_str(&format!("concat: {} segments\n", segments.len()));
    out
}

pub async fn run(room: &Room, settings: &RecordingSettings, sink: &dyn RecordingSink) -> Result<PathBuf, RecordingError> {
    let room_dir = super::export::session_dir(&settings.root_dir, &room.cid);
    let files = collect_files(&room_dir).await?;
    if files.is_empty() {
        return Err(RecordingError::PostProcessingFailed(format!(
            "no recording files found under {}",
            room_dir.display()
        )));
    }

    let spans = build_spans(&files).await?;
    let segments = build_segments(&spans);
    let filter_spec = build_filter_spec(&spans, &segments);

    let output_path = room_dir.join("output.webm");
    let mut child = Command::new(&settings.media_processor_binary)
        .arg("-y")
        .args(spans.iter().flat_map(|s| ["-i".to_string(), s.path.display().to_string()]))
        .args(["-filter_complex_script", "-"])
        .arg(&output_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        use tokio::io::AsyncWriteExt;
        let _ = stdin.write_all(filter_spec.as_bytes()).await;
    }
    let status = child.wait().await?;

    if !status.success() {
        warn!(room = %room.id(), "post-processing composite encode failed");
        return Err(RecordingError::PostProcessingFailed(format!(
            "composite encode exited with {status}"
        )));
    }

    info!(room = %room.id(), output = %output_path.display(), "room recording post-processed");
    sink.on_room_recorded(room.id(), &output_path).await;
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(path: &str, kind: RtpKind, start_ms: i64, end_ms: i64) -> FileSpan {
        FileSpan { path: PathBuf::from(path), user_id: "u".into(), kind, start_ms, end_ms }
    }

    #[test]
    fn parse_filename_splits_relative_ms_user_and_kind() {
        let path = Path::new("/rec/1200-alice-a.webm");
        let (relative_ms, user_id, kind) = parse_filename(path).unwrap();
        assert_eq!(relative_ms, 1200);
        assert_eq!(user_id, "alice");
        assert_eq!(kind, RtpKind::Audio);

        let path = Path::new("/rec/0-bob-v.webm");
        let (relative_ms, user_id, kind) = parse_filename(path).unwrap();
        assert_eq!(relative_ms, 0);
        assert_eq!(user_id, "bob");
        assert_eq!(kind, RtpKind::Video);
    }

    #[test]
    fn parse_filename_rejects_unknown_tags_and_shapes() {
        assert!(parse_filename(Path::new("/rec/alice-a.webm")).is_none());
        assert!(parse_filename(Path::new("/rec/1200-alice-x.webm")).is_none());
        assert!(parse_filename(Path::new("/rec/garbage.webm")).is_none());
    }

    #[test]
    fn change_points_are_sorted_and_deduplicated() {
        let spans = vec![span("a", RtpKind::Audio, 0, 1000), span("b", RtpKind::Video, 500, 1000)];
        assert_eq!(change_points(&spans), vec![0, 500, 1000]);
    }

    #[test]
    fn build_segments_splits_on_overlap_boundaries() {
        let spans = vec![span("a", RtpKind::Audio, 0, 1000), span("b", RtpKind::Video, 500, 1500)];
        let segments = build_segments(&spans);
        assert_eq!(segments.len(), 3);

        assert_eq!((segments[0].start_ms, segments[0].end_ms), (0, 500));
        assert_eq!(segments[0].members, vec![0]);

        assert_eq!((segments[1].start_ms, segments[1].end_ms), (500, 1000));
        assert_eq!(segments[1].members, vec![0, 1]);

        assert_eq!((segments[2].start_ms, segments[2].end_ms), (1000, 1500));
        assert_eq!(segments[2].members, vec![1]);
    }

    #[test]
    fn build_segments_skips_zero_width_gaps() {
        let spans = vec![span("a", RtpKind::Audio, 0, 1000)];
        let segments = build_segments(&spans);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn grid_layout_matches_spec_rule() {
        assert_eq!(grid_layout(0), (0, 0));
        assert_eq!(grid_layout(1), (1, 1));
        assert_eq!(grid_layout(2), (2, 1));
        assert_eq!(grid_layout(3), (2, 1));
        assert_eq!(grid_layout(4), (2, 2));
        assert_eq!(grid_layout(5), (3, 3));
        assert_eq!(grid_layout(9), (3, 3));
    }

    #[test]
    fn build_filter_spec_mentions_every_segment_and_member() {
        let spans = vec![span("a", RtpKind::Audio, 0, 1000), span("b", RtpKind::Video, 0, 1000)];
        let segments = build_segments(&spans);
        let spec = build_filter_spec(&spans, &segments);
        assert!(spec.contains("segment 0"));
        assert!(spec.contains("audio atrim"));
        assert!(spec.contains("video trim"));
        assert!(spec.contains("concat: 1 segments"));
    }
}
