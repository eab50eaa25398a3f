//! inswapper_128 face swapper via ONNX Runtime.
//!
//! Takes the target face as a 128×128 aligned crop and the source identity as
//! a 512-dim latent, and produces the swapped crop, which is blended back
//! into the frame.

use crate::alignment;
use crate::backend::ExecutionBackend;
use crate::ports::{FaceSwap, PortError};
use crate::session_pool::{SessionPool, SessionPoolError};
use crate::types::{Embedding, FaceRecord};
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: u32 = 128;
const INSWAPPER_LATENT_DIM: usize = 512;
/// Width of the blend ramp at the crop border, in crop pixels.
const INSWAPPER_FEATHER: f32 = 12.0;

#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("model file not found: {0} — inswapper_128.onnx and its inswapper_emap.bin must both be in the model directory")]
    ModelNotFound(String),
    #[error("invalid emap file {path}: {reason}")]
    InvalidEmap { path: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("target face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("replacement face has no embedding")]
    NoSourceEmbedding,
    #[error("swapper: {0}")]
    Pool(#[from] SessionPoolError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// inswapper-based face compositor.
pub struct FaceSwapper {
    sessions: SessionPool,
    /// Row-major 512×512 projection from ArcFace space into the swapper's latent space.
    emap: Array2<f32>,
}

impl FaceSwapper {
    /// Load `sessions` copies of the inswapper model and its `emap` projection.
    ///
    /// The emap is the last initializer of the inswapper graph, exported as
    /// raw little-endian f32 (512×512). The model produces a different
    /// identity without it, so a missing emap is a missing model file.
    pub fn load(
        model_path: &str,
        emap_path: &str,
        backend: ExecutionBackend,
        sessions: usize,
    ) -> Result<Self, SwapperError> {
        for path in [model_path, emap_path] {
            if !Path::new(path).exists() {
                return Err(SwapperError::ModelNotFound(path.to_string()));
            }
        }

        let emap = load_emap(emap_path)?;
        let pool = SessionPool::load(model_path, backend, sessions)?;
        let inputs: Vec<String> = pool.first()?.inputs().iter().map(|i| i.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            emap = emap_path,
            %backend,
            sessions = pool.len(),
            ?inputs,
            "loaded inswapper model"
        );

        Ok(Self { sessions: pool, emap })
    }

    /// Swap `source`'s identity onto `target` and blend the result into a copy of `frame`.
    pub fn swap_face(
        &self,
        frame: &RgbImage,
        target: &FaceRecord,
        source: &FaceRecord,
    ) -> Result<RgbImage, SwapperError> {
        let landmarks = target.keypoints.as_ref().ok_or(SwapperError::NoLandmarks)?;
        let identity = source.embedding.as_ref().ok_or(SwapperError::NoSourceEmbedding)?;

        let (aligned, to_crop) = alignment::align_face(frame, landmarks, INSWAPPER_INPUT_SIZE);
        let target_blob = target_tensor(&aligned);
        let source_latent = latent(identity, &self.emap)?;

        let swapped = self.sessions.with(|session| -> Result<_, SwapperError> {
            let outputs = session.run(ort::inputs![
                "target" => TensorRef::from_array_view(target_blob.view())?,
                "source" => TensorRef::from_array_view(source_latent.view())?,
            ])?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| SwapperError::InferenceFailed(format!("swap output: {e}")))?;
            output_to_crop(data)
        })??;

        let mut out = frame.clone();
        alignment::paste_back(&mut out, &swapped, &to_crop, INSWAPPER_FEATHER);
        Ok(out)
    }
}

impl FaceSwap for FaceSwapper {
    fn swap(
        &self,
        frame: &RgbImage,
        target: &FaceRecord,
        source: &FaceRecord,
    ) -> Result<RgbImage, PortError> {
        Ok(self.swap_face(frame, target, source)?)
    }
}

fn load_emap(path: &str) -> Result<Array2<f32>, SwapperError> {
    let bytes = std::fs::read(path)?;
    let expected = INSWAPPER_LATENT_DIM * INSWAPPER_LATENT_DIM * 4;
    if bytes.len() != expected {
        return Err(SwapperError::InvalidEmap {
            path: path.to_string(),
            reason: format!("expected {expected} bytes, got {}", bytes.len()),
        });
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Array2::from_shape_vec((INSWAPPER_LATENT_DIM, INSWAPPER_LATENT_DIM), values).map_err(|e| {
        SwapperError::InvalidEmap {
            path: path.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Source latent: normalized embedding, projected through `emap`, renormalized.
fn latent(identity: &Embedding, emap: &Array2<f32>) -> Result<Array2<f32>, SwapperError> {
    let normed = identity.normalized().values;
    if emap.nrows() != normed.len() {
        return Err(SwapperError::InferenceFailed(format!(
            "embedding has {} values, emap expects {}",
            normed.len(),
            emap.nrows()
        )));
    }
    let row = Array2::from_shape_fn((1, normed.len()), |(_, i)| normed[i]);

    let projected = row.dot(emap);
    let norm = projected.iter().map(|x| x * x).sum::<f32>().sqrt();
    Ok(if norm > 0.0 { projected / norm } else { projected })
}

/// 128×128 RGB crop → NCHW tensor in [0, 1].
fn target_tensor(aligned: &RgbImage) -> Array4<f32> {
    let size = INSWAPPER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
        }
    }
    tensor
}

/// NCHW [1, 3, 128, 128] model output in [0, 1] → RGB crop.
fn output_to_crop(data: &[f32]) -> Result<RgbImage, SwapperError> {
    let size = INSWAPPER_INPUT_SIZE as usize;
    let plane = size * size;
    if data.len() != 3 * plane {
        return Err(SwapperError::InferenceFailed(format!(
            "expected {} output values, got {}",
            3 * plane,
            data.len()
        )));
    }

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Ok(RgbImage::from_fn(INSWAPPER_INPUT_SIZE, INSWAPPER_INPUT_SIZE, |x, y| {
        let i = y as usize * size + x as usize;
        Rgb([to_u8(data[i]), to_u8(data[plane + i]), to_u8(data[2 * plane + i])])
    }))
}
