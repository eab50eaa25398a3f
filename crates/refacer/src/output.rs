//! Output file naming.

use std::path::{Path, PathBuf};

/// Seconds since the Unix epoch, used to keep output names unique.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `<stem>_preview.mp4` in preview mode, else `<stem>_<timestamp>.mp4`.
pub fn video_output_path(dir: &Path, input: &Path, preview: bool, timestamp: i64) -> PathBuf {
    let stem = file_stem(input);
    let name = if preview {
        format!("{stem}_preview.mp4")
    } else {
        format!("{stem}_{timestamp}.mp4")
    };
    dir.join(name)
}

/// `<stem>_<timestamp>.jpg`.
pub fn image_output_path(dir: &Path, input: &Path, timestamp: i64) -> PathBuf {
    dir.join(format!("{}_{timestamp}.jpg", file_stem(input)))
}

/// `<stem>_face<n>.png`, numbered from 1.
pub fn face_crop_path(dir: &Path, input: &Path, n: usize) -> PathBuf {
    dir.join(format!("{}_face{n}.png", file_stem(input)))
}

pub fn is_gif(input: &Path) -> bool {
    input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
}

fn file_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}
