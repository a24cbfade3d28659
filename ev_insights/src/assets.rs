//! ABOUTME: Clip asset persistence and retention under `assets_dir/<clip_id>/` (4.8)
//! ABOUTME: Filesystem errors are logged and suppressed per the retention pruning contract

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ev_protocol::ErrorCode;

/// Replace runs of non `[A-Za-z0-9._-]` with `-`, strip leading/trailing `-_.`,
/// truncate to 80 chars, and fall back to `"frame"` if the result is empty.
pub fn sanitize_frame_id(frame_id: &str) -> String {
    let mut out = String::with_capacity(frame_id.len());
    let mut prev_dash = false;
    for ch in frame_id.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '_' || c == '.');
    let truncated: String = trimmed.chars().take(80).collect();
    if truncated.is_empty() {
        "frame".to_string()
    } else {
        truncated
    }
}

/// Write one clip frame to `assets_dir/<clip_id>/NN-<sanitized_frame_id>.jpg`.
pub async fn write_clip_frame(
    assets_dir: &Path,
    clip_id: &str,
    index: usize,
    frame_id: &str,
    jpeg: &[u8],
) -> Result<PathBuf, ErrorCode> {
    let clip_dir = assets_dir.join(clip_id);
    tokio::fs::create_dir_all(&clip_dir)
        .await
        .map_err(|_| ErrorCode::InsightAssetWriteFailed)?;

    let filename = format!("{:02}-{}.jpg", index, sanitize_frame_id(frame_id));
    let path = clip_dir.join(filename);
    tokio::fs::write(&path, jpeg)
        .await
        .map_err(|_| ErrorCode::InsightAssetWriteFailed)?;
    Ok(path)
}

/// Prune sibling clip directories under `assets_dir`, skipping `current_clip_id`.
/// A directory is pruned when it's older than `max_age_hours` or beyond the
/// `max_clips` most-recently-modified directories. Errors are logged and
/// suppressed: retention is best-effort housekeeping, not a correctness path.
pub async fn prune_assets(assets_dir: &Path, current_clip_id: &str, max_clips: usize, max_age_hours: u64) {
    let mut entries = match tokio::fs::read_dir(assets_dir).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read assets dir for retention pruning");
            return;
        }
    };

    let mut dirs: Vec<(PathBuf, SystemTime)> = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "error walking assets dir during pruning");
                break;
            }
        };

        if entry.file_name() == std::ffi::OsStr::new(current_clip_id) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_dir() => m,
            _ => continue,
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        dirs.push((entry.path(), modified));
    }

    dirs.sort_by(|a, b| b.1.cmp(&a.1));

    let max_age = std::time::Duration::from_secs(max_age_hours * 3600);
    let now = SystemTime::now();

    for (index, (path, modified)) in dirs.iter().enumerate() {
        let too_old = now.duration_since(*modified).unwrap_or_default() > max_age;
        let too_many = index >= max_clips;
        if too_old || too_many {
            if let Err(err) = tokio::fs::remove_dir_all(path).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to prune clip asset directory");
            }
        }
    }
}
