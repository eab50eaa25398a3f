//! Still-image decode, encode, and face crops.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageFormat, RgbImage};
use reface_core::BoundingBox;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{MediaError, MediaResult};

const JPEG_QUALITY: u8 = 100;

/// Decode any supported image file to RGB.
pub fn load_rgb(path: impl AsRef<Path>) -> MediaResult<RgbImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let image = image::open(path).map_err(|e| MediaError::image(path, e))?;
    Ok(image.to_rgb8())
}

pub fn save_jpeg(image: &RgbImage, path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref();
    let mut out = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(image)
        .map_err(|e| MediaError::image(path, e))?;
    out.flush()?;
    Ok(())
}

pub fn save_png(image: &RgbImage, path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref();
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| MediaError::image(path, e))
}

/// Copy of the region under `bbox`, clamped to the image. `None` when the
/// clamped region is empty.
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox.clamp_to(image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}
