//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference layout and
//! warps RGB crops in both directions: frame → aligned crop (for the
//! recognizer and swapper inputs) and aligned crop → frame (for pasting a
//! swapped face back).

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 crop.
pub const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Reference landmarks scaled for a square crop of `size` pixels.
///
/// Sizes that are a multiple of 112 scale the layout; sizes that are a
/// multiple of 128 keep the 112 layout and shift it right by `8 * size / 128`.
pub fn reference_landmarks(size: u32) -> Landmarks {
    let (ratio, shift_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio + shift_x, y * ratio))
}

/// A 2×3 similarity transform `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform(pub [f32; 6]);

impl SimilarityTransform {
    /// Least-squares estimate of the transform taking `src` onto `dst`.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Self {
        // Overdetermined system A * [a, b, tx, ty]^T = B, two rows per point:
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [0.0f32; 16];
        let mut atb = [0.0f32; 4];

        for ((sx, sy), (dx, dy)) in src.iter().copied().zip(dst.iter().copied()) {
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];

            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        let [a, b, tx, ty] = solve_4x4(&ata, &atb);
        Self([a, -b, tx, b, a, ty])
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        let m = &self.0;
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }

    /// The inverse transform, or `None` when the scale is degenerate.
    pub fn inverse(&self) -> Option<Self> {
        let [a, _, tx, b, _, ty] = self.0;
        let det = a * a + b * b;
        if det.abs() < 1e-12 {
            return None;
        }
        let ia = a / det;
        let ib = -b / det;
        // Inverse of [[a, -b], [b, a]] is [[ia, -ib], [ib, ia]]; translation follows.
        let itx = -(ia * tx - ib * ty);
        let ity = -(ib * tx + ia * ty);
        Some(Self([ia, -ib, itx, ib, ia, ity]))
    }
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i * 4..i * 4 + 4]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let max_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Bilinear RGB sample at a sub-pixel position; `None` outside the image.
fn sample_rgb(img: &RgbImage, x: f32, y: f32) -> Option<[f32; 3]> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    if x0 < -1 || y0 < -1 || x0 >= w || y0 >= h {
        return None;
    }
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xx: i64, yy: i64| -> [f32; 3] {
        if xx >= 0 && xx < w && yy >= 0 && yy < h {
            let p = img.get_pixel(xx as u32, yy as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    Some(out)
}

/// Warp `frame` through `to_crop` into a `size`×`size` RGB crop.
///
/// Out-of-bounds pixels are black.
pub fn warp_to_crop(frame: &RgbImage, to_crop: &SimilarityTransform, size: u32) -> RgbImage {
    let mut crop = RgbImage::new(size, size);
    let Some(to_frame) = to_crop.inverse() else {
        return crop;
    };

    for (ox, oy, pixel) in crop.enumerate_pixels_mut() {
        let (sx, sy) = to_frame.apply((ox as f32, oy as f32));
        if let Some(v) = sample_rgb(frame, sx, sy) {
            *pixel = Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8));
        }
    }

    crop
}

/// Align a detected face to a canonical `size`×`size` crop.
///
/// Returns the crop and the frame → crop transform used to produce it.
pub fn align_face(frame: &RgbImage, landmarks: &Landmarks, size: u32) -> (RgbImage, SimilarityTransform) {
    let to_crop = SimilarityTransform::estimate(landmarks, &reference_landmarks(size));
    (warp_to_crop(frame, &to_crop, size), to_crop)
}

/// Blend `crop` back into `frame` through the inverse of `to_crop`.
///
/// The blend weight falls off linearly over `feather` pixels from the crop
/// border, so the pasted face has no hard seam.
pub fn paste_back(frame: &mut RgbImage, crop: &RgbImage, to_crop: &SimilarityTransform, feather: f32) {
    let Some(to_frame) = to_crop.inverse() else {
        return;
    };
    let size = crop.width() as f32;

    // Frame-space bounding box of the crop's corners.
    let corners = [(0.0, 0.0), (size, 0.0), (0.0, size), (size, size)].map(|p| to_frame.apply(p));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as u32)
        .min(frame.width());
    let max_y = (corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as u32)
        .min(frame.height());

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (cx, cy) = to_crop.apply((x as f32, y as f32));
            if cx < 0.0 || cy < 0.0 || cx > size - 1.0 || cy > size - 1.0 {
                continue;
            }
            let edge = cx.min(cy).min(size - 1.0 - cx).min(size - 1.0 - cy);
            let alpha = if feather > 0.0 { (edge / feather).clamp(0.0, 1.0) } else { 1.0 };
            if alpha <= 0.0 {
                continue;
            }
            let Some(src) = sample_rgb(crop, cx, cy) else {
                continue;
            };
            let dst = frame.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = src[c] * alpha + dst[c] as f32 * (1.0 - alpha);
                dst[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
