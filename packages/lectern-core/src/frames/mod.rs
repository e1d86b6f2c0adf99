//! Demo-video frame sampling.
//!
//! For opt-in demo videos, samples frames at scene-change boundaries,
//! filters out talking-head shots, and uploads the kept frames to the
//! shared image bucket keyed by content-item id. Temp files are scoped
//! to a single invocation and removed on exit, success or failure.

pub mod analysis;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;

use bytes::Bytes;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::FRAMES_BUCKET;
use crate::error::{LecternError, LecternResult};
use crate::store::objects::ObjectStorage;
use crate::util::format_timestamp;

pub use analysis::{
    classify_frame, edge_density, perceptual_hash, DisabledPersonDetector, FrameVerdict,
    PersonDetector, Region,
};

/// Minimum spacing between kept frames, and the fallback sampling
/// interval when scene detection finds nothing.
pub const MIN_FRAME_INTERVAL_SECS: f64 = 30.0;

/// Scene-change sensitivity for the ffmpeg select filter.
const SCENE_THRESHOLD: &str = "0.2";

/// A filtered frame held in memory, awaiting upload once the owning
/// content-item id is known.
#[derive(Debug, Clone)]
pub struct FilteredFrame {
    pub jpeg: Bytes,
    pub timestamp_seconds: f64,
    pub time_formatted: String,
    pub perceptual_hash: String,
}

/// One kept frame, uploaded and addressable.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SampledFrame {
    pub storage_path: String,
    pub url: String,
    pub timestamp_seconds: f64,
    pub time_formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
}

/// A frame on disk awaiting filtering.
#[derive(Debug, Clone)]
struct CandidateFrame {
    path: PathBuf,
    timestamp_seconds: f64,
}

fn showinfo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[Parsed_showinfo[^\]]*\]\s+n:\s*\d+.*?pts_time:([\d.]+)").expect("valid regex")
    })
}

/// Parses frame timestamps out of ffmpeg showinfo stderr output.
fn parse_showinfo_timestamps(stderr: &str) -> Vec<f64> {
    showinfo_re()
        .captures_iter(stderr)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Drops frames closer than `min_interval` to the previously kept one.
fn enforce_min_spacing(frames: Vec<CandidateFrame>, min_interval: f64) -> Vec<CandidateFrame> {
    let mut kept = Vec::new();
    let mut last = -min_interval;
    for frame in frames {
        if frame.timestamp_seconds - last >= min_interval {
            last = frame.timestamp_seconds;
            kept.push(frame);
        }
    }
    kept
}

/// Samples, filters, and uploads demo-video frames.
pub struct FrameSampler {
    detector: Arc<dyn PersonDetector>,
    min_interval: f64,
}

impl FrameSampler {
    pub fn new(detector: Arc<dyn PersonDetector>) -> Self {
        Self {
            detector,
            min_interval: MIN_FRAME_INTERVAL_SECS,
        }
    }

    /// Extracts and filters frames. Upload happens separately once the
    /// owning content-item id is known.
    pub async fn extract(
        &self,
        video_path: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<Vec<FilteredFrame>> {
        // Dropped at the end of this call, removing every extracted frame.
        let temp_dir = tempfile::tempdir()?;

        let mut candidates = self
            .detect_scene_changes(video_path, temp_dir.path(), cancel)
            .await?;
        if candidates.is_empty() {
            log::warn!("[Frames] No scene changes detected, falling back to fixed interval");
            candidates = self
                .extract_by_interval(video_path, temp_dir.path(), cancel)
                .await?;
        }

        let candidates = enforce_min_spacing(candidates, self.min_interval);
        log::info!("[Frames] {} candidates after spacing filter", candidates.len());

        let mut kept = Vec::new();
        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(LecternError::Cancelled);
            }

            let image = match image::open(&candidate.path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    log::warn!(
                        "[Frames] Unreadable frame {}: {}",
                        candidate.path.display(),
                        e
                    );
                    continue;
                }
            };

            let verdict = classify_frame(&image, self.detector.as_ref());
            if !verdict.keep() {
                log::debug!(
                    "[Frames] Rejected frame at {}: {:?}",
                    format_timestamp(candidate.timestamp_seconds),
                    verdict
                );
                continue;
            }

            let hash = perceptual_hash(&image);
            let content = tokio::fs::read(&candidate.path).await?;
            kept.push(FilteredFrame {
                jpeg: Bytes::from(content),
                timestamp_seconds: candidate.timestamp_seconds,
                time_formatted: format_timestamp(candidate.timestamp_seconds),
                perceptual_hash: format!("{:016x}", hash),
            });
        }

        log::info!("[Frames] Kept {} screen-content frames", kept.len());
        Ok(kept)
    }

    /// Uploads filtered frames under the content-item id.
    pub async fn upload(
        &self,
        storage: &dyn ObjectStorage,
        article_id: i64,
        frames: &[FilteredFrame],
    ) -> LecternResult<Vec<SampledFrame>> {
        let mut uploaded = Vec::with_capacity(frames.len());
        for frame in frames {
            let storage_path = format!(
                "article_{}/frame_{}.jpg",
                article_id, frame.timestamp_seconds as i64
            );
            let url = storage
                .upload(FRAMES_BUCKET, &storage_path, frame.jpeg.clone(), "image/jpeg")
                .await?;
            uploaded.push(SampledFrame {
                storage_path,
                url,
                timestamp_seconds: frame.timestamp_seconds,
                time_formatted: frame.time_formatted.clone(),
                perceptual_hash: Some(frame.perceptual_hash.clone()),
            });
        }
        Ok(uploaded)
    }

    async fn detect_scene_changes(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<Vec<CandidateFrame>> {
        let pattern = temp_dir.join("scene_%04d.jpg");
        let filter = format!("select='gt(scene,{})',showinfo", SCENE_THRESHOLD);

        let output = run_tool(
            tokio::process::Command::new("ffmpeg")
                .arg("-i")
                .arg(video_path)
                .arg("-vf")
                .arg(&filter)
                .arg("-vsync")
                .arg("vfr")
                .arg("-q:v")
                .arg("2")
                .arg(&pattern),
            cancel,
        )
        .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let timestamps = parse_showinfo_timestamps(&stderr);
        let files = sorted_frames(temp_dir, "scene_").await?;

        let frames = files
            .into_iter()
            .enumerate()
            .map(|(idx, path)| CandidateFrame {
                path,
                // showinfo timestamps pair 1:1 with emitted frames;
                // estimate if ffmpeg printed fewer lines than files.
                timestamp_seconds: timestamps
                    .get(idx)
                    .copied()
                    .unwrap_or(idx as f64 * self.min_interval),
            })
            .collect();
        Ok(frames)
    }

    async fn extract_by_interval(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<Vec<CandidateFrame>> {
        let pattern = temp_dir.join("frame_%04d.jpg");

        run_tool(
            tokio::process::Command::new("ffmpeg")
                .arg("-i")
                .arg(video_path)
                .arg("-vf")
                .arg(format!("fps=1/{}", self.min_interval as u64))
                .arg("-q:v")
                .arg("2")
                .arg(&pattern),
            cancel,
        )
        .await?;

        let files = sorted_frames(temp_dir, "frame_").await?;
        Ok(files
            .into_iter()
            .enumerate()
            .map(|(idx, path)| CandidateFrame {
                path,
                timestamp_seconds: idx as f64 * self.min_interval,
            })
            .collect())
    }
}

/// Probes a media file's duration in seconds.
pub async fn probe_duration(media_path: &Path) -> LecternResult<Option<f64>> {
    let output = tokio::process::Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(media_path)
        .output()
        .await
        .map_err(|e| LecternError::Internal(format!("ffprobe: {}", e)))?;

    if !output.status.success() {
        return Ok(None);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().parse().ok())
}

async fn run_tool(
    command: &mut tokio::process::Command,
    cancel: &CancellationToken,
) -> LecternResult<std::process::Output> {
    let child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LecternError::Internal(format!("spawning ffmpeg: {}", e)))?;

    let output = tokio::select! {
        result = child.wait_with_output() => {
            result.map_err(|e| LecternError::Internal(format!("ffmpeg: {}", e)))?
        }
        _ = cancel.cancelled() => return Err(LecternError::Cancelled),
    };

    // Scene detection "failures" are common warnings; callers decide
    // based on emitted files, not the exit code.
    if !output.status.success() {
        log::warn!(
            "[Frames] ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .last()
                .unwrap_or_default()
        );
    }
    Ok(output)
}

async fn sorted_frames(dir: &Path, prefix: &str) -> LecternResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(prefix) && name.ends_with(".jpg") {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_showinfo_lines() {
        let stderr = "\
[Parsed_showinfo_1 @ 0x7f8] n:   0 pts:  18304 pts_time:1.144 duration:512\n\
garbage line\n\
[Parsed_showinfo_1 @ 0x7f8] n:   1 pts: 738304 pts_time:46.144 duration:512\n";
        let timestamps = parse_showinfo_timestamps(stderr);
        assert_eq!(timestamps, vec![1.144, 46.144]);
    }

    #[test]
    fn spacing_filter_drops_close_frames() {
        let frames: Vec<CandidateFrame> = [0.0, 10.0, 31.0, 45.0, 62.0]
            .iter()
            .map(|&t| CandidateFrame {
                path: PathBuf::from(format!("{}.jpg", t)),
                timestamp_seconds: t,
            })
            .collect();

        let kept = enforce_min_spacing(frames, 30.0);
        let stamps: Vec<f64> = kept.iter().map(|f| f.timestamp_seconds).collect();
        assert_eq!(stamps, vec![0.0, 31.0, 62.0]);
    }

    #[test]
    fn first_frame_always_kept() {
        let frames = vec![CandidateFrame {
            path: PathBuf::from("a.jpg"),
            timestamp_seconds: 3.0,
        }];
        assert_eq!(enforce_min_spacing(frames, 30.0).len(), 1);
    }
}
