use reface_core::{FaceDetector, FaceEngine, FaceEnhancer, FaceRecognizer, FaceSwapper, PortError};
use std::sync::Arc;

use crate::config::Config;
use crate::error::RefaceError;

/// Load the SCRFD, ArcFace and inswapper models from `config.model_dir`,
/// plus CodeFormer when stills are enhanced.
///
/// Every model gets one session per frame worker. Fails fast on the first
/// missing or unloadable required model.
pub fn load_engine(config: &Config) -> Result<FaceEngine, RefaceError> {
    let backend = config.effective_backend();
    let sessions = backend.worker_count();

    let scrfd_path = config.scrfd_model_path();
    let detector = FaceDetector::load(&scrfd_path, backend, sessions)
        .map_err(|e| model_error(&scrfd_path, e))?;

    let arcface_path = config.arcface_model_path();
    let recognizer = FaceRecognizer::load(&arcface_path, backend, sessions)
        .map_err(|e| model_error(&arcface_path, e))?;

    let inswapper_path = config.inswapper_model_path();
    let emap_path = config.inswapper_emap_path();
    let swapper = FaceSwapper::load(&inswapper_path, &emap_path, backend, sessions)
        .map_err(|e| model_error(&inswapper_path, e))?;

    let mut engine = FaceEngine::new(Arc::new(detector), Arc::new(recognizer), Arc::new(swapper));

    match config.codeformer_model_path() {
        Some(path) => {
            // Stills are enhanced one at a time.
            let enhancer = FaceEnhancer::load(&path, backend, 1, config.enhance_fidelity)
                .map_err(|e| model_error(&path, e))?;
            engine = engine.with_enhancer(Arc::new(enhancer));
        }
        None if config.enhance_images => {
            tracing::warn!(
                dir = %config.model_dir.display(),
                "no codeformer.onnx; refaced images are saved without enhancement"
            );
        }
        None => {}
    }

    tracing::info!(
        %backend,
        sessions,
        enhance = engine.has_enhancer(),
        dir = %config.model_dir.display(),
        "face models loaded"
    );
    Ok(engine)
}

fn model_error(path: &str, err: impl Into<PortError>) -> RefaceError {
    RefaceError::Model {
        path: path.to_string(),
        source: err.into(),
    }
}
