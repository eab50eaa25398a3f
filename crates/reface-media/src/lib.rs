//! reface-media — video and image I/O for refacer.
//!
//! Wraps the `ffmpeg`/`ffprobe` binaries: stream probing, raw rgb24 frame
//! pipes in both directions, encoder selection, audio remux and GIF export.
//! Still images go through the `image` crate.

pub mod command;
pub mod encoder;
pub mod error;
pub mod probe;
pub mod reader;
pub mod remux;
pub mod still;
pub mod writer;

pub use encoder::{probe_encoder, EncoderChoice};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use reader::VideoReader;
pub use writer::VideoWriter;
