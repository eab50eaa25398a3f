//! Post-processing of a rendered video: source audio remux and GIF export.

use std::path::{Path, PathBuf};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

const GIF_FILTER: &str = "fps=10,scale=512:-1:flags=lanczos";

/// Name of the remuxed copy: the rendered file name plus `<suffix>_c.mp4`.
pub fn remux_path(rendered: &Path, suffix: u32) -> PathBuf {
    let name = rendered
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    rendered.with_file_name(format!("{name}{suffix}_c.mp4"))
}

/// Mux `rendered`'s video with `source`'s audio into `output`.
///
/// The rendered video stream is copied as-is. The rendered file is left in
/// place.
pub fn remux_audio(rendered: &Path, source: &Path, output: &Path) -> MediaResult<PathBuf> {
    for path in [rendered, source] {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
    }

    remux_command(rendered, source, output).run()?;

    tracing::debug!(
        rendered = %rendered.display(),
        source = %source.display(),
        output = %output.display(),
        "remuxed source audio"
    );
    Ok(output.to_path_buf())
}

fn remux_command(rendered: &Path, source: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(rendered, output)
        .add_input(source)
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy")
}

/// Export a looping GIF next to `video` (same stem, `.gif`).
pub fn export_gif(video: &Path) -> MediaResult<PathBuf> {
    if !video.exists() {
        return Err(MediaError::FileNotFound(video.to_path_buf()));
    }

    let gif = video.with_extension("gif");
    FfmpegCommand::new(video, &gif)
        .video_filter(GIF_FILTER)
        .output_args(["-loop", "0"])
        .run()?;

    tracing::info!(path = %gif.display(), "exported gif");
    Ok(gif)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remux_path_appends_suffix() {
        let path = remux_path(Path::new("output/clip_1700000000.mp4"), 42);
        assert_eq!(path, Path::new("output/clip_1700000000.mp442_c.mp4"));
    }

    #[test]
    fn test_remux_requires_inputs() {
        let err = remux_audio(
            Path::new("/nonexistent/rendered.mp4"),
            Path::new("/nonexistent/source.mp4"),
            Path::new("/nonexistent/out.mp4"),
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_remux_copies_the_rendered_video_stream() {
        let args = remux_command(
            Path::new("rendered.mp4"),
            Path::new("source.mp4"),
            Path::new("out.mp4"),
        )
        .build_args();

        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert_eq!(args[codec + 1], "copy");
        assert!(!args.iter().any(|a| a == "-b:v"));
        let maps: Vec<&str> = args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && args[i - 1] == "-map")
            .map(|(_, a)| a.as_str())
            .collect();
        assert_eq!(maps, ["0:v:0", "1:a:0"]);
    }

    #[test]
    fn test_export_gif_requires_video() {
        assert!(matches!(
            export_gif(Path::new("/nonexistent/clip.mp4")),
            Err(MediaError::FileNotFound(_))
        ));
    }
}
