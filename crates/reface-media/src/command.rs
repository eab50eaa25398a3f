//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Path ffmpeg reads as stdin or writes as stdout.
pub const PIPE: &str = "-";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input files, each with the arguments that precede its `-i`.
    inputs: Vec<(Vec<String>, PathBuf)>,
    output: PathBuf,
    /// Arguments after the last input.
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![(Vec::new(), input.as_ref().to_path_buf())],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument to the most recently added input.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some((args, _)) = self.inputs.last_mut() {
            args.push(arg.into());
        }
        self
    }

    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self = self.input_arg(arg);
        }
        self
    }

    /// Add a further input file.
    pub fn add_input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push((Vec::new(), input.as_ref().to_path_buf()));
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Declare the current input as raw rgb24 frames of the given size and rate.
    pub fn raw_rgb_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .input_arg("-s")
            .input_arg(format!("{width}x{height}"))
            .input_arg("-r")
            .input_arg(format!("{fps}"))
    }

    /// Emit raw rgb24 frames.
    pub fn raw_rgb_output(self) -> Self {
        self.output_args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn video_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:v").output_arg(bitrate)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for (input_args, input) in &self.inputs {
            args.extend(input_args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Run to completion, failing with ffmpeg's stderr on a non-zero exit.
    pub fn run(&self) -> MediaResult<()> {
        ensure_ffmpeg()?;
        let args = self.build_args();
        debug!(args = ?args, "running ffmpeg");

        let output = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(MediaError::FfmpegFailed {
                message: format!("ffmpeg exited with {}", output.status),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
                exit_code: output.status.code(),
            });
        }
        Ok(())
    }

    /// Spawn with piped stdin/stdout for raw frame streaming.
    pub fn spawn(&self, stdin: Stdio, stdout: Stdio) -> MediaResult<Child> {
        ensure_ffmpeg()?;
        let args = self.build_args();
        debug!(args = ?args, "spawning ffmpeg");

        Ok(Command::new("ffmpeg")
            .args(&args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()?)
    }
}

pub fn ensure_ffmpeg() -> MediaResult<()> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_orders_inputs_and_outputs() {
        let args = FfmpegCommand::new("rendered.mp4", "final.mp4")
            .add_input("source.mp4")
            .map("0:v:0")
            .map("1:a:0")
            .video_codec("libx264")
            .video_bitrate("0")
            .build_args();

        assert_eq!(
            args,
            [
                "-y", "-v", "error", "-i", "rendered.mp4", "-i", "source.mp4", "-map", "0:v:0",
                "-map", "1:a:0", "-c:v", "libx264", "-b:v", "0", "final.mp4",
            ]
        );
    }

    #[test]
    fn test_raw_rgb_input_precedes_its_input() {
        let args = FfmpegCommand::new(PIPE, "out.mp4")
            .raw_rgb_input(640, 360, 25.0)
            .build_args();

        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "-");
        assert!(args[..i].contains(&"640x360".to_string()));
        assert!(args[..i].contains(&"rgb24".to_string()));
        assert!(args[..i].contains(&"25".to_string()));
    }

    #[test]
    fn test_log_level_override() {
        let args = FfmpegCommand::new("a", "b").log_level("quiet").build_args();
        assert_eq!(&args[1..3], ["-v", "quiet"]);
    }
}
