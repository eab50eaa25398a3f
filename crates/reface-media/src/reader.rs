//! Sequential frame reader over an ffmpeg rawvideo rgb24 pipe.

use image::RgbImage;
use reface_core::Frame;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Stdio};
use std::thread::JoinHandle;

use crate::command::{FfmpegCommand, PIPE};
use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;

/// Splits a byte stream of packed rgb24 frames into [`Frame`]s.
///
/// Every source frame is read; only those whose index is a multiple of
/// `skip_rate` are yielded, carrying their source index.
pub struct RawFrameReader<R> {
    inner: R,
    width: u32,
    height: u32,
    skip_rate: usize,
    next_index: usize,
    buf: Vec<u8>,
}

impl<R: Read> RawFrameReader<R> {
    pub fn new(inner: R, width: u32, height: u32, skip_rate: usize) -> Self {
        Self {
            inner,
            width,
            height,
            skip_rate: skip_rate.max(1),
            next_index: 0,
            buf: vec![0; width as usize * height as usize * 3],
        }
    }

    /// Fill `buf` with one frame. `Ok(false)` on a clean end of stream.
    fn read_frame(&mut self) -> MediaResult<bool> {
        let mut filled = 0;
        while filled < self.buf.len() {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => Ok(false),
            n if n == self.buf.len() => Ok(true),
            n => Err(MediaError::InvalidVideo(format!(
                "truncated frame {}: {n} of {} bytes",
                self.next_index,
                self.buf.len()
            ))),
        }
    }

    fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        loop {
            if !self.read_frame()? {
                return Ok(None);
            }
            let index = self.next_index;
            self.next_index += 1;

            if index % self.skip_rate != 0 {
                continue;
            }

            let image = RgbImage::from_raw(self.width, self.height, self.buf.clone()).ok_or_else(
                || MediaError::InvalidVideo(format!("frame {index} does not fit {}x{}", self.width, self.height)),
            )?;
            return Ok(Some(Frame::new(index, image)));
        }
    }
}

impl<R: Read> Iterator for RawFrameReader<R> {
    type Item = MediaResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Decodes a video file through ffmpeg and yields its frames in order.
///
/// When the stream ends the ffmpeg process is reaped; a non-zero exit
/// surfaces as a final error item.
pub struct VideoReader {
    frames: RawFrameReader<BufReader<ChildStdout>>,
    child: Option<Child>,
    stderr: Option<JoinHandle<String>>,
}

impl VideoReader {
    pub fn open(path: impl AsRef<Path>, info: &VideoInfo, skip_rate: usize) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let mut child = FfmpegCommand::new(path, PIPE)
            .raw_rgb_output()
            .spawn(Stdio::null(), Stdio::piped())?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "ffmpeg stdout not captured"))?;
        let stderr = child.stderr.take().map(drain);

        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            skip_rate,
            "opened video reader"
        );

        Ok(Self {
            frames: RawFrameReader::new(BufReader::new(stdout), info.width, info.height, skip_rate),
            child: Some(child),
            stderr,
        })
    }

    fn reap(&mut self) -> MediaResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let stderr = self.stderr.take().and_then(|h| h.join().ok());

        if !status.success() {
            return Err(MediaError::FfmpegFailed {
                message: format!("decoder exited with {status}"),
                stderr,
                exit_code: status.code(),
            });
        }
        Ok(())
    }
}

impl Iterator for VideoReader {
    type Item = MediaResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.frames.next() {
            Some(item) => Some(item),
            None => self.reap().err().map(Err),
        }
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Collect a child's stderr on a separate thread so the pipe never fills.
pub(crate) fn drain<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut text = String::new();
        let _ = stream.read_to_string(&mut text);
        text
    })
}
