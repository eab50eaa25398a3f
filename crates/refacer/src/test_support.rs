//! Stub ports for session tests.
//!
//! A face is a pure-red pixel in row 0 of an image; its green channel is
//! the identity (embedding = green / 100). Swapping writes the replacement's
//! identity into the blue channel of row 1 below the face. Enhancing floods
//! the whole image green when the face was swapped first, red otherwise.

use image::{Rgb, RgbImage};
use reface_core::{
    BoundingBox, Embedding, FaceDetection, FaceEmbedding, FaceEngine, FaceEnhance, FaceRecord,
    FaceSwap, Landmarks, PortError,
};
use std::sync::Arc;

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 2;

struct PaintedDetector;

impl FaceDetection for PaintedDetector {
    fn detect(&self, frame: &RgbImage, max_faces: usize) -> Result<Vec<FaceRecord>, PortError> {
        let faces = (0..frame.width())
            .filter(|&x| frame.get_pixel(x, 0)[0] == 255)
            .map(|x| {
                let xf = x as f32;
                let kps: Landmarks = [(xf, 0.0); 5];
                FaceRecord::new(BoundingBox::new(xf, 0.0, xf + 1.0, 2.0), Some(kps), 1.0)
            });
        Ok(match max_faces {
            0 => faces.collect(),
            n => faces.take(n).collect(),
        })
    }
}

struct PaintedEmbedder;

impl FaceEmbedding for PaintedEmbedder {
    fn embed(&self, frame: &RgbImage, keypoints: &Landmarks) -> Result<Embedding, PortError> {
        let (x, y) = keypoints[0];
        let green = frame.get_pixel(x as u32, y as u32)[1];
        Ok(Embedding::new(vec![green as f32 / 100.0]))
    }

    fn similarity(&self, a: &Embedding, b: &Embedding) -> f32 {
        1.0 - (a.values[0] - b.values[0]).abs()
    }
}

struct MarkingSwapper;

impl FaceSwap for MarkingSwapper {
    fn swap(
        &self,
        frame: &RgbImage,
        target: &FaceRecord,
        source: &FaceRecord,
    ) -> Result<RgbImage, PortError> {
        let identity = source
            .embedding
            .as_ref()
            .map(|e| (e.values[0] * 100.0).round() as u8)
            .ok_or(PortError::Backend {
                stage: "swap",
                message: "replacement without embedding".to_string(),
            })?;
        let mut out = frame.clone();
        out.get_pixel_mut(target.bbox.x1 as u32, 1)[2] = identity;
        Ok(out)
    }
}

struct MarkingEnhancer;

impl FaceEnhance for MarkingEnhancer {
    fn enhance(&self, image: &RgbImage, face: &FaceRecord) -> Result<RgbImage, PortError> {
        let swapped = image.get_pixel(face.bbox.x1 as u32, 1)[2] != 10;
        let flood = if swapped { Rgb([0, 250, 0]) } else { Rgb([250, 0, 0]) };
        Ok(RgbImage::from_pixel(image.width(), image.height(), flood))
    }
}

pub fn stub_engine_with_enhancer() -> FaceEngine {
    stub_engine().with_enhancer(Arc::new(MarkingEnhancer))
}

pub fn stub_engine() -> FaceEngine {
    FaceEngine::new(
        Arc::new(PaintedDetector),
        Arc::new(PaintedEmbedder),
        Arc::new(MarkingSwapper),
    )
}

/// A 16x2 image with one face per `(x, identity)`.
pub fn painted_image(faces: &[(u32, u8)]) -> RgbImage {
    let mut image = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([10, 10, 10]));
    for &(x, identity) in faces {
        image.put_pixel(x, 0, Rgb([255, identity, 0]));
    }
    image
}
