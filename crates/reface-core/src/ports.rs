//! Inference ports: detection, embedding, swap, and optional enhancement.
//!
//! The matcher and frame pipeline only see these traits. The ONNX-backed
//! implementations live in [`crate::detector`], [`crate::recognizer`],
//! [`crate::swapper`] and [`crate::enhancer`]; tests plug in stubs.

use crate::detector::DetectorError;
use crate::enhancer::EnhancerError;
use crate::recognizer::RecognizerError;
use crate::swapper::SwapperError;
use crate::types::{Embedding, FaceRecord, Landmarks};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("face embedding failed: {0}")]
    Embedding(#[from] RecognizerError),
    #[error("face swap failed: {0}")]
    Swap(#[from] SwapperError),
    #[error("face enhancement failed: {0}")]
    Enhance(#[from] EnhancerError),
    #[error("{stage} backend error: {message}")]
    Backend { stage: &'static str, message: String },
}

/// Finds faces in a frame.
pub trait FaceDetection: Send + Sync {
    /// Detect faces, returning at most `max_faces` (0 = no cap).
    ///
    /// Returned records have no embedding. Ordering is detector-defined.
    fn detect(&self, frame: &RgbImage, max_faces: usize) -> Result<Vec<FaceRecord>, PortError>;
}

/// Extracts identity embeddings and scores them against each other.
pub trait FaceEmbedding: Send + Sync {
    fn embed(&self, frame: &RgbImage, keypoints: &Landmarks) -> Result<Embedding, PortError>;

    /// Similarity between two embeddings. Higher = more similar; scale is model-defined.
    fn similarity(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.similarity(b)
    }
}

/// Composites `source`'s identity onto `target` in `frame`.
///
/// Must not retain state between calls.
pub trait FaceSwap: Send + Sync {
    fn swap(
        &self,
        frame: &RgbImage,
        target: &FaceRecord,
        source: &FaceRecord,
    ) -> Result<RgbImage, PortError>;
}

/// Restores detail in one face of an image.
pub trait FaceEnhance: Send + Sync {
    fn enhance(&self, image: &RgbImage, face: &FaceRecord) -> Result<RgbImage, PortError>;
}

/// The inference ports of one session, shared across worker threads.
#[derive(Clone)]
pub struct FaceEngine {
    detector: Arc<dyn FaceDetection>,
    embedder: Arc<dyn FaceEmbedding>,
    swapper: Arc<dyn FaceSwap>,
    enhancer: Option<Arc<dyn FaceEnhance>>,
}

impl FaceEngine {
    pub fn new(
        detector: Arc<dyn FaceDetection>,
        embedder: Arc<dyn FaceEmbedding>,
        swapper: Arc<dyn FaceSwap>,
    ) -> Self {
        Self {
            detector,
            embedder,
            swapper,
            enhancer: None,
        }
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn FaceEnhance>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn has_enhancer(&self) -> bool {
        self.enhancer.is_some()
    }

    pub fn detect(&self, frame: &RgbImage, max_faces: usize) -> Result<Vec<FaceRecord>, PortError> {
        self.detector.detect(frame, max_faces)
    }

    /// Detect faces and fill in the embedding of every face that has keypoints.
    pub fn analyze(&self, frame: &RgbImage, max_faces: usize) -> Result<Vec<FaceRecord>, PortError> {
        let mut faces = self.detector.detect(frame, max_faces)?;
        self.embed_all(frame, &mut faces)?;
        Ok(faces)
    }

    /// Fill in embeddings for faces detected in `frame`.
    pub fn embed_all(&self, frame: &RgbImage, faces: &mut [FaceRecord]) -> Result<(), PortError> {
        for face in faces.iter_mut() {
            if let Some(kps) = face.keypoints.as_ref() {
                face.embedding = Some(self.embedder.embed(frame, kps)?);
            }
        }
        Ok(())
    }

    pub fn similarity(&self, a: &Embedding, b: &Embedding) -> f32 {
        self.embedder.similarity(a, b)
    }

    pub fn swap(
        &self,
        frame: &RgbImage,
        target: &FaceRecord,
        source: &FaceRecord,
    ) -> Result<RgbImage, PortError> {
        self.swapper.swap(frame, target, source)
    }

    /// Run the enhancer over every detected face with landmarks.
    ///
    /// Without an enhancer the image is returned untouched.
    pub fn enhance(&self, image: RgbImage) -> Result<RgbImage, PortError> {
        let Some(enhancer) = &self.enhancer else {
            return Ok(image);
        };

        let faces = self.detector.detect(&image, 0)?;
        let mut out = image;
        for face in faces.iter().filter(|f| f.keypoints.is_some()) {
            out = enhancer.enhance(&out, face)?;
        }
        Ok(out)
    }
}
