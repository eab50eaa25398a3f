//! CodeFormer face restoration via ONNX Runtime.
//!
//! Each face is aligned to the FFHQ 512×512 layout, restored, and blended
//! back into the image. Used on refaced stills, where the 128px swap output
//! is visibly soft.

use crate::alignment::{self, SimilarityTransform};
use crate::backend::ExecutionBackend;
use crate::ports::{FaceEnhance, PortError};
use crate::session_pool::{SessionPool, SessionPoolError};
use crate::types::{FaceRecord, Landmarks};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const CODEFORMER_INPUT_SIZE: u32 = 512;
/// Blend ramp at the crop border, in crop pixels.
const CODEFORMER_FEATHER: f32 = 32.0;

/// FFHQ landmark layout, as fractions of the crop size.
const FFHQ_LANDMARKS: Landmarks = [
    (0.376_916_8, 0.468_646_6),
    (0.622_857, 0.469_128_1),
    (0.501_238_6, 0.613_319),
    (0.393_088_2, 0.725_411),
    (0.611_502, 0.724_904_6),
];

#[derive(Error, Debug)]
pub enum EnhancerError {
    #[error("model file not found: {0} — place codeformer.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks to align")]
    NoLandmarks,
    #[error("enhancer: {0}")]
    Pool(#[from] SessionPoolError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// CodeFormer-based face restorer.
pub struct FaceEnhancer {
    sessions: SessionPool,
    /// Takes a second `weight` input (fidelity, 0 = quality, 1 = identity).
    weighted: bool,
    fidelity: f64,
}

impl FaceEnhancer {
    pub fn load(
        model_path: &str,
        backend: ExecutionBackend,
        sessions: usize,
        fidelity: f64,
    ) -> Result<Self, EnhancerError> {
        if !Path::new(model_path).exists() {
            return Err(EnhancerError::ModelNotFound(model_path.to_string()));
        }

        let pool = SessionPool::load(model_path, backend, sessions)?;
        let inputs: Vec<String> = pool.first()?.inputs().iter().map(|i| i.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            %backend,
            sessions = pool.len(),
            ?inputs,
            fidelity,
            "loaded CodeFormer model"
        );

        Ok(Self {
            sessions: pool,
            weighted: inputs.len() > 1,
            fidelity: fidelity.clamp(0.0, 1.0),
        })
    }

    /// Restore `face` and blend the result into a copy of `image`.
    pub fn enhance_face(&self, image: &RgbImage, face: &FaceRecord) -> Result<RgbImage, EnhancerError> {
        let landmarks = face.keypoints.as_ref().ok_or(EnhancerError::NoLandmarks)?;
        let to_crop = SimilarityTransform::estimate(landmarks, &ffhq_landmarks(CODEFORMER_INPUT_SIZE));
        let aligned = alignment::warp_to_crop(image, &to_crop, CODEFORMER_INPUT_SIZE);
        let input = preprocess(&aligned);
        let weight = Array1::from_elem(1, self.fidelity);

        let restored = self.sessions.with(|session| -> Result<_, EnhancerError> {
            let outputs = if self.weighted {
                session.run(ort::inputs![
                    TensorRef::from_array_view(input.view())?,
                    TensorRef::from_array_view(weight.view())?,
                ])?
            } else {
                session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?
            };
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EnhancerError::InferenceFailed(format!("restored face: {e}")))?;
            output_to_crop(data)
        })??;

        let mut out = image.clone();
        alignment::paste_back(&mut out, &restored, &to_crop, CODEFORMER_FEATHER);
        Ok(out)
    }
}

impl FaceEnhance for FaceEnhancer {
    fn enhance(&self, image: &RgbImage, face: &FaceRecord) -> Result<RgbImage, PortError> {
        Ok(self.enhance_face(image, face)?)
    }
}

fn ffhq_landmarks(size: u32) -> Landmarks {
    let s = size as f32;
    FFHQ_LANDMARKS.map(|(x, y)| (x * s, y * s))
}

/// RGB crop → NCHW tensor in [-1, 1].
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = CODEFORMER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px[c] as f32 / 127.5 - 1.0;
        }
    }
    tensor
}

/// NCHW model output in [-1, 1] → RGB crop.
fn output_to_crop(data: &[f32]) -> Result<RgbImage, EnhancerError> {
    let size = CODEFORMER_INPUT_SIZE as usize;
    let plane = size * size;
    if data.len() != 3 * plane {
        return Err(EnhancerError::InferenceFailed(format!(
            "expected {} output values, got {}",
            3 * plane,
            data.len()
        )));
    }

    let to_u8 = |v: f32| ((v.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8;
    Ok(RgbImage::from_fn(CODEFORMER_INPUT_SIZE, CODEFORMER_INPUT_SIZE, |x, y| {
        let i = y as usize * size + x as usize;
        Rgb([to_u8(data[i]), to_u8(data[plane + i]), to_u8(data[2 * plane + i])])
    }))
}
