//! Per-frame work unit: detect, pair, swap.

use crate::matcher::SessionConfig;
use crate::ports::{FaceEngine, PortError};
use crate::types::Frame;
use image::RgbImage;

/// Processes single frames against one session's configuration.
///
/// Holds only shared references, so one processor serves every worker of a
/// [`FramePipeline`](crate::pipeline::FramePipeline).
#[derive(Clone, Copy)]
pub struct FrameProcessor<'a> {
    engine: &'a FaceEngine,
    config: &'a SessionConfig,
}

impl<'a> FrameProcessor<'a> {
    pub fn new(engine: &'a FaceEngine, config: &'a SessionConfig) -> Self {
        Self { engine, config }
    }

    /// Reface one frame, keeping its index.
    pub fn process(&self, frame: Frame) -> Result<Frame, PortError> {
        let Frame { index, image } = frame;
        let image = self.process_image(image)?;
        Ok(Frame { index, image })
    }

    /// Reface one image. An image with no detected face is returned as-is.
    pub fn process_image(&self, image: RgbImage) -> Result<RgbImage, PortError> {
        let mut faces = self.engine.detect(&image, 0)?;
        if faces.is_empty() {
            return Ok(image);
        }

        if self.config.mode().needs_embeddings() {
            self.engine.embed_all(&image, &mut faces)?;
        }

        let pairings = self.config.pair(&faces, |a, b| self.engine.similarity(a, b));
        let specs = self.config.specs();

        let mut out = image;
        for pairing in &pairings {
            out = self
                .engine
                .swap(&out, &faces[pairing.face], &specs[pairing.spec].replacement)?;
        }

        tracing::trace!(faces = faces.len(), swaps = pairings.len(), "frame processed");
        Ok(out)
    }
}
