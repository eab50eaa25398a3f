//! Turns face configs into an immutable [`SessionConfig`].

use reface_core::{FaceEngine, FaceRecord, ReplacementSpec, SessionConfig};
use reface_media::still;
use std::path::Path;

use crate::error::RefaceError;
use crate::face_config::FaceConfig;

/// Per-request switches shared by the video and image sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefaceOptions {
    /// Fast low-fidelity video render (every n-th frame, no audio).
    pub preview: bool,
    /// Replace faces without comparing against origins.
    pub disable_similarity: bool,
    /// Pair replacements with faces left to right.
    pub multiple_faces: bool,
}

/// Analyze every destination (and origin, when similarity is used) and
/// build the session's replacement specs.
///
/// Configs without a destination are skipped. Origins are only analyzed in
/// similarity mode.
pub fn prepare_faces(
    engine: &FaceEngine,
    faces: &[FaceConfig],
    options: &RefaceOptions,
    default_threshold: f32,
) -> Result<SessionConfig, RefaceError> {
    let mut specs = Vec::with_capacity(faces.len());

    for (index, face) in faces.iter().enumerate() {
        let Some(destination) = face.destination.as_deref() else {
            tracing::warn!(index, "face config has no destination image; skipping");
            continue;
        };

        let replacement = top_face(engine, destination)?
            .ok_or_else(|| RefaceError::NoFaceInDestination(destination.to_path_buf()))?;

        let spec = match face.origin.as_deref() {
            Some(origin) if !options.multiple_faces && !options.disable_similarity => {
                let embedding = top_face(engine, origin)?
                    .and_then(|f| f.embedding)
                    .ok_or_else(|| RefaceError::NoFaceInOrigin(origin.to_path_buf()))?;
                let threshold = face.threshold.unwrap_or(default_threshold);
                tracing::debug!(
                    index,
                    destination = %destination.display(),
                    origin = %origin.display(),
                    threshold,
                    "prepared targeted replacement"
                );
                ReplacementSpec::targeted(embedding, replacement, threshold)
            }
            _ => {
                tracing::debug!(index, destination = %destination.display(), "prepared replacement");
                ReplacementSpec::any_face(replacement)
            }
        };
        specs.push(spec);
    }

    let session = SessionConfig::new(specs, options.multiple_faces, options.disable_similarity)
        .map_err(|_| RefaceError::NoValidDestination)?;

    tracing::info!(
        specs = session.specs().len(),
        mode = ?session.mode(),
        "face configs prepared"
    );
    Ok(session)
}

/// The detector's top-ranked face in the image at `path`, with its embedding.
fn top_face(engine: &FaceEngine, path: &Path) -> Result<Option<FaceRecord>, RefaceError> {
    let image = still::load_rgb(path)?;
    Ok(engine.analyze(&image, 1)?.into_iter().next())
}
