//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.

use crate::backend::ExecutionBackend;
use crate::ports::{FaceDetection, PortError};
use crate::session_pool::{SessionPool, SessionPoolError};
use crate::types::{BoundingBox, FaceRecord, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface buffalo_l into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector: {0}")]
    Pool(#[from] SessionPoolError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
///
/// Holds one session per frame worker so detections run side by side.
pub struct FaceDetector {
    sessions: SessionPool,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load `sessions` copies of the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str, backend: ExecutionBackend, sessions: usize) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let pool = SessionPool::load(model_path, backend, sessions)?;

        let output_names: Vec<String> =
            pool.first()?.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = model_path,
            %backend,
            sessions = pool.len(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            sessions: pool,
            stride_indices,
        })
    }

    /// Detect faces in an RGB frame, sorted by confidence.
    ///
    /// With `max_faces > 0`, keeps the `max_faces` largest and most central faces.
    pub fn detect_faces(&self, frame: &RgbImage, max_faces: usize) -> Result<Vec<FaceRecord>, DetectorError> {
        let (input, letterbox) = preprocess(frame);

        let all_detections = self.sessions.with(|session| -> Result<_, DetectorError> {
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let mut detections = Vec::new();

            for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
                let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

                let (_, scores) = outputs[score_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
                let (_, bboxes) = outputs[bbox_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
                let (_, kps) = outputs[kps_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

                detections.extend(decode_stride(
                    scores,
                    bboxes,
                    kps,
                    stride,
                    &letterbox,
                    SCRFD_CONFIDENCE_THRESHOLD,
                ));
            }
            Ok(detections)
        })??;

        let faces = nms(all_detections, SCRFD_NMS_THRESHOLD);
        Ok(limit_faces(faces, max_faces, frame.width(), frame.height()))
    }
}

impl FaceDetection for FaceDetector {
    fn detect(&self, frame: &RgbImage, max_faces: usize) -> Result<Vec<FaceRecord>, PortError> {
        Ok(self.detect_faces(frame, max_faces)?)
    }
}

/// Letterbox an RGB frame into the 640×640 NCHW input tensor.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let input = SCRFD_INPUT_SIZE as f32;
    let scale = (input / width).min(input / height);

    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) as f32 / 2.0;

    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    // Padding is filled with the mean so it normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    let off_x = pad_x.floor() as usize;
    let off_y = pad_y.floor() as usize;

    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (off_x + x as usize, off_y + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x: off_x as f32, pad_y: off_y as f32 })
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports name outputs either "score_8", "bbox_16", ... or with
/// generic integers. Falls back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes, [6-8]=kps"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level into frame coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceRecord> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let to_frame = |x: f32, y: f32| -> (f32, f32) {
        ((x - letterbox.pad_x) / letterbox.scale, (y - letterbox.pad_y) / letterbox.scale)
    };

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * s;
        let anchor_cy = (anchor_idx / grid) as f32 * s;

        // Distances [left, top, right, bottom] from the anchor, in stride units.
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = to_frame(anchor_cx - d[0] * s, anchor_cy - d[1] * s);
        let (x2, y2) = to_frame(anchor_cx + d[2] * s, anchor_cy + d[3] * s);

        let keypoints = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            let mut lms: Landmarks = [(0.0, 0.0); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                *lm = to_frame(anchor_cx + k[i * 2] * s, anchor_cy + k[i * 2 + 1] * s);
            }
            lms
        });

        detections.push(FaceRecord::new(BoundingBox::new(x1, y1, x2, y2), keypoints, score));
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by descending score.
///
/// Detections with a non-finite score or box are dropped first.
fn nms(mut detections: Vec<FaceRecord>, iou_threshold: f32) -> Vec<FaceRecord> {
    detections.retain(|d| d.score.is_finite() && d.bbox.is_finite());
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<FaceRecord> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Keep the `max_faces` best faces, ranked by area minus twice the squared
/// distance of the box center from the frame center. `0` keeps everything.
fn limit_faces(faces: Vec<FaceRecord>, max_faces: usize, width: u32, height: u32) -> Vec<FaceRecord> {
    if max_faces == 0 || faces.len() <= max_faces {
        return faces;
    }

    let (fcx, fcy) = (width as f32 / 2.0, height as f32 / 2.0);
    let rank = |f: &FaceRecord| {
        let (cx, cy) = f.bbox.center();
        f.bbox.area() - 2.0 * ((cx - fcx).powi(2) + (cy - fcy).powi(2))
    };

    let mut ranked: Vec<(f32, FaceRecord)> = faces.into_iter().map(|f| (rank(&f), f)).collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked.into_iter().take(max_faces).map(|(_, f)| f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> FaceRecord {
        FaceRecord::new(BoundingBox::new(x1, y1, x2, y2), None, score)
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            face(0.0, 0.0, 100.0, 100.0, 0.8),
            face(5.0, 5.0, 105.0, 105.0, 0.9),
            face(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let detections = vec![face(0.0, 0.0, 10.0, 10.0, 0.9), face(50.0, 50.0, 60.0, 60.0, 0.8)];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_limit_faces_prefers_large_central_faces() {
        let faces = vec![
            face(0.0, 0.0, 20.0, 20.0, 0.99),     // small, in the corner
            face(80.0, 80.0, 120.0, 120.0, 0.6),  // central
            face(150.0, 0.0, 200.0, 50.0, 0.8),   // large, off-center
        ];
        let kept = limit_faces(faces, 1, 200, 200);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox.x1, 80.0);
    }

    #[test]
    fn test_nan_detections_are_dropped_without_panicking() {
        let mut detections: Vec<FaceRecord> = (0..40)
            .map(|i| {
                let x = i as f32 * 30.0;
                face(x, 0.0, x + 20.0, 20.0, 0.5 + i as f32 / 100.0)
            })
            .collect();
        for i in [3, 7, 11, 19, 23, 31] {
            detections[i].score = f32::NAN;
            detections[i].bbox.x1 = f32::NAN;
        }

        let kept = nms(detections, 0.4);
        assert_eq!(kept.len(), 34);
        assert!(kept.iter().all(|f| f.score.is_finite()));
        assert!(kept.windows(2).all(|w| w[0].score >= w[1].score));

        let mut ranked = kept.clone();
        ranked[0].bbox.x2 = f32::NAN;
        assert_eq!(limit_faces(ranked, 5, 1200, 20).len(), 5);
    }

    #[test]
    fn test_limit_faces_zero_keeps_all() {
        let faces = vec![face(0.0, 0.0, 1.0, 1.0, 0.9), face(5.0, 5.0, 6.0, 6.0, 0.8)];
        assert_eq!(limit_faces(faces, 0, 10, 10).len(), 2);
    }

    #[test]
    fn test_preprocess_letterbox_geometry() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([127, 127, 127]));
        let (tensor, lb) = preprocess(&frame);

        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        // Padding rows normalize to zero.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        let lb = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let grid = SCRFD_INPUT_SIZE / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

        // One confident anchor at grid cell (x=2, y=3), stride 32.
        let idx = (3 * grid + 2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        scores[idx] = 0.95;
        let mut bboxes = vec![0.0; anchors * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let kps = vec![0.0; anchors * 10];

        let dets = decode_stride(&scores, &bboxes, &kps, 32, &lb, 0.5);
        assert_eq!(dets.len(), 1);

        // Anchor center (64, 96) in input space; box ±32 → (32..96, 64..128).
        let b = dets[0].bbox;
        assert!((b.x1 - 16.0).abs() < 1e-4, "x1 = {}", b.x1);
        assert!((b.y1 - (-8.0)).abs() < 1e-4, "y1 = {}", b.y1);
        assert!((b.x2 - 48.0).abs() < 1e-4, "x2 = {}", b.x2);
        assert!((b.y2 - 24.0).abs() < 1e-4, "y2 = {}", b.y2);
        let kp = dets[0].keypoints.unwrap();
        assert!((kp[0].0 - 32.0).abs() < 1e-4 && (kp[0].1 - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8",  "bbox_16",  "bbox_32",
            "kps_8",   "kps_16",   "kps_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
