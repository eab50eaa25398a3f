//! Still-image refacing and face extraction.

use reface_core::FrameProcessor;
use reface_media::still;
use std::path::{Path, PathBuf};

use crate::error::RefaceError;
use crate::face_config::FaceConfig;
use crate::output;
use crate::prepare::{prepare_faces, RefaceOptions};
use crate::Refacer;

impl Refacer {
    /// Reface one image and save it as a JPEG under the output directory.
    ///
    /// When an enhancer is loaded, every face of the refaced image is
    /// restored before saving.
    pub fn reface_image(
        &self,
        input: &Path,
        faces: &[FaceConfig],
        options: &RefaceOptions,
    ) -> Result<PathBuf, RefaceError> {
        let session = prepare_faces(&self.engine, faces, options, self.config.default_threshold)?;
        let image = still::load_rgb(input)?;

        let refaced = FrameProcessor::new(&self.engine, &session).process_image(image)?;
        let refaced = self.engine.enhance(refaced)?;

        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = output::image_output_path(&self.config.output_dir, input, output::unix_timestamp());
        still::save_jpeg(&refaced, &path)?;

        tracing::info!(input = %input.display(), output = %path.display(), "refaced image saved");
        Ok(path)
    }

    /// Crop up to `max_faces` detected faces out of an image and save each as PNG.
    ///
    /// Crops go to `out_dir` when given, else to kept temporary files.
    /// `max_faces` defaults to the configured extraction cap.
    pub fn extract_faces(
        &self,
        input: &Path,
        max_faces: Option<usize>,
        out_dir: Option<&Path>,
    ) -> Result<Vec<PathBuf>, RefaceError> {
        let max_faces = max_faces.unwrap_or(self.config.max_extract_faces).max(1);
        let image = still::load_rgb(input)?;
        let faces = self.engine.analyze(&image, max_faces)?;

        if let Some(dir) = out_dir {
            std::fs::create_dir_all(dir)?;
        }

        let mut crops = Vec::with_capacity(faces.len());
        for face in faces.iter().take(max_faces) {
            let Some(crop) = still::crop(&image, &face.bbox) else {
                tracing::debug!(bbox = ?face.bbox, "face box outside image; skipping");
                continue;
            };

            let path = match out_dir {
                Some(dir) => output::face_crop_path(dir, input, crops.len() + 1),
                None => tempfile::Builder::new()
                    .prefix("refacer-face-")
                    .suffix(".png")
                    .tempfile()?
                    .into_temp_path()
                    .keep()
                    .map_err(|e| e.error)?,
            };
            still::save_png(&crop, &path)?;
            crops.push(path);
        }

        tracing::info!(input = %input.display(), faces = crops.len(), "faces extracted");
        Ok(crops)
    }
}
