//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from aligned face crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment;
use crate::backend::ExecutionBackend;
use crate::ports::{FaceEmbedding, PortError};
use crate::session_pool::{SessionPool, SessionPoolError};
use crate::types::{Embedding, Landmarks};
use image::RgbImage;
use ndarray::Array4;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download w600k_r50.onnx from insightface buffalo_l into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("recognizer: {0}")]
    Pool(#[from] SessionPoolError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    sessions: SessionPool,
}

impl FaceRecognizer {
    /// Load `sessions` copies of the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str, backend: ExecutionBackend, sessions: usize) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let pool = SessionPool::load(model_path, backend, sessions)?;
        let outputs: Vec<String> = pool.first()?.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            %backend,
            sessions = pool.len(),
            ?outputs,
            "loaded ArcFace model"
        );

        Ok(Self { sessions: pool })
    }

    /// Extract an L2-normalized embedding for the face at `landmarks`.
    pub fn extract(&self, frame: &RgbImage, landmarks: &Landmarks) -> Result<Embedding, RecognizerError> {
        let (aligned, _) = alignment::align_face(frame, landmarks, ARCFACE_INPUT_SIZE);
        let input = preprocess(&aligned);

        let raw: Vec<f32> = self.sessions.with(|session| -> Result<_, RecognizerError> {
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;
            Ok(raw_data.to_vec())
        })??;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let embedding = Embedding {
            values: raw,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        };
        Ok(embedding.normalized())
    }
}

impl FaceEmbedding for FaceRecognizer {
    fn embed(&self, frame: &RgbImage, keypoints: &Landmarks) -> Result<Embedding, PortError> {
        Ok(self.extract(frame, keypoints)?)
    }
}

/// Preprocess a 112x112 RGB aligned crop into a NCHW float tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, px) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}
