//! H.264 encoder selection.
//!
//! Hardware encoders are preferred when ffmpeg lists them and a short test
//! encode succeeds; `libx264` is the fallback.

use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};

/// Candidates in priority order, each with the bitrate passed as `-b:v`.
const CANDIDATES: [(&str, &str); 3] = [
    ("h264_videotoolbox", "0"),
    ("h264_nvenc", "0"),
    ("libx264", "0"),
];

const FALLBACK_CODEC: &str = "libx264";
const FALLBACK_BITRATE: &str = "0";

const TEST_SOURCE: &str = "testsrc=duration=1:size=1280x720:rate=30";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderChoice {
    pub codec: String,
    pub bitrate: String,
}

impl Default for EncoderChoice {
    fn default() -> Self {
        Self {
            codec: FALLBACK_CODEC.to_string(),
            bitrate: FALLBACK_BITRATE.to_string(),
        }
    }
}

/// Pick the best working encoder on this machine. Never fails.
pub fn probe_encoder() -> EncoderChoice {
    let listing = match Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
    {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).to_string(),
        Ok(out) => {
            tracing::warn!(status = %out.status, "ffmpeg -encoders failed; using {FALLBACK_CODEC}");
            return EncoderChoice::default();
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not run ffmpeg; using {FALLBACK_CODEC}");
            return EncoderChoice::default();
        }
    };

    let choice = choose_encoder(&parse_encoder_list(&listing), test_encode);
    tracing::info!(codec = %choice.codec, bitrate = %choice.bitrate, "selected video encoder");
    choice
}

/// First candidate that is both listed and passes `works`.
pub fn choose_encoder<F>(available: &[String], works: F) -> EncoderChoice
where
    F: Fn(&str) -> bool,
{
    CANDIDATES
        .iter()
        .find(|(codec, _)| available.iter().any(|a| a == *codec) && works(*codec))
        .map(|(codec, bitrate)| EncoderChoice {
            codec: codec.to_string(),
            bitrate: bitrate.to_string(),
        })
        .unwrap_or_default()
}

/// Encoder names from `ffmpeg -encoders`, video encoders only.
///
/// Rows follow a `------` separator and look like
/// ` V....D libx264              libx264 H.264 / AVC ...`.
pub fn parse_encoder_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let flags = cols.next()?;
            let name = cols.next()?;
            flags.starts_with('V').then(|| name.to_string())
        })
        .collect()
}

fn test_encode(codec: &str) -> bool {
    let ok = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i", TEST_SOURCE, "-c:v", codec, "-f", "null", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if !ok {
        tracing::warn!(codec, "test encode failed; skipping encoder");
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn test_parse_encoder_list_skips_legend_and_audio() {
        assert_eq!(parse_encoder_list(LISTING), ["libx264", "h264_nvenc"]);
    }

    #[test]
    fn test_prefers_hardware_encoder() {
        let choice = choose_encoder(&parse_encoder_list(LISTING), |_| true);
        assert_eq!(choice.codec, "h264_nvenc");
        assert_eq!(choice.bitrate, "0");
    }

    #[test]
    fn test_skips_encoder_failing_test_encode() {
        let choice = choose_encoder(&parse_encoder_list(LISTING), |c| c != "h264_nvenc");
        assert_eq!(choice.codec, "libx264");
    }

    #[test]
    fn test_falls_back_when_nothing_works() {
        assert_eq!(choose_encoder(&[], |_| true), EncoderChoice::default());
        let available = vec!["libx264".to_string()];
        assert_eq!(choose_encoder(&available, |_| false).codec, "libx264");
    }
}
