//! Sequential frame writer into an ffmpeg rawvideo rgb24 pipe.

use reface_core::Frame;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};
use std::thread::JoinHandle;

use crate::command::{FfmpegCommand, PIPE};
use crate::encoder::EncoderChoice;
use crate::error::{MediaError, MediaResult};
use crate::reader::drain;

/// libx264/yuv420p need even dimensions.
const EVEN_DIMENSIONS: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

/// Writes packed rgb24 frames, enforcing size and strictly increasing indices.
pub struct RawFrameWriter<W> {
    inner: W,
    width: u32,
    height: u32,
    last_index: Option<usize>,
    written: usize,
}

impl<W: Write> RawFrameWriter<W> {
    pub fn new(inner: W, width: u32, height: u32) -> Self {
        Self {
            inner,
            width,
            height,
            last_index: None,
            written: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        if let Some(last) = self.last_index {
            if frame.index <= last {
                return Err(MediaError::FrameOrder {
                    index: frame.index,
                    last,
                });
            }
        }
        if frame.width() != self.width || frame.height() != self.height {
            return Err(MediaError::FrameSize {
                index: frame.index,
                width: self.width,
                height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        self.inner.write_all(frame.image.as_raw())?;
        self.last_index = Some(frame.index);
        self.written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> usize {
        self.written
    }

    pub fn into_inner(mut self) -> MediaResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Encodes frames to a video file through ffmpeg.
pub struct VideoWriter {
    frames: Option<RawFrameWriter<BufWriter<ChildStdin>>>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    path: PathBuf,
}

impl VideoWriter {
    pub fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: f64,
        encoder: &EncoderChoice,
    ) -> MediaResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut child = FfmpegCommand::new(PIPE, &path)
            .raw_rgb_input(width, height, fps)
            .video_filter(EVEN_DIMENSIONS)
            .video_codec(&encoder.codec)
            .video_bitrate(&encoder.bitrate)
            .output_args(["-pix_fmt", "yuv420p"])
            .spawn(Stdio::piped(), Stdio::null())?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "ffmpeg stdin not captured"))?;
        let stderr = child.stderr.take().map(drain);

        tracing::debug!(
            path = %path.display(),
            width,
            height,
            fps,
            codec = %encoder.codec,
            "opened video writer"
        );

        Ok(Self {
            frames: Some(RawFrameWriter::new(BufWriter::new(stdin), width, height)),
            child,
            stderr,
            path,
        })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        match self.frames.as_mut() {
            Some(frames) => frames.write_frame(frame),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer already finished").into()),
        }
    }

    /// Close the pipe and wait for ffmpeg to finish the file.
    pub fn finish(mut self) -> MediaResult<PathBuf> {
        let written = match self.frames.take() {
            Some(frames) => {
                let count = frames.frames_written();
                // Dropping stdin signals end of stream.
                drop(frames.into_inner()?);
                count
            }
            None => 0,
        };

        let status = self.child.wait()?;
        let stderr = self.stderr.take().and_then(|h| h.join().ok());
        if !status.success() {
            return Err(MediaError::FfmpegFailed {
                message: format!("encoder exited with {status} writing {}", self.path.display()),
                stderr,
                exit_code: status.code(),
            });
        }

        tracing::debug!(path = %self.path.display(), frames = written, "video writer finished");
        Ok(std::mem::take(&mut self.path))
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if self.frames.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
