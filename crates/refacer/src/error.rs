use reface_core::{PortError, ThreadPoolBuildError};
use reface_media::MediaError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefaceError {
    #[error("no valid destination face: every face config lacks a destination")]
    NoValidDestination,
    #[error("no face found in destination image {0}")]
    NoFaceInDestination(PathBuf),
    #[error("no face found in origin image {0}")]
    NoFaceInOrigin(PathBuf),
    #[error("media: {0}")]
    Media(#[from] MediaError),
    #[error("inference: {0}")]
    Inference(#[from] PortError),
    #[error("loading model {path}: {source}")]
    Model {
        path: String,
        #[source]
        source: PortError,
    },
    #[error("worker pool: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("face config {path}: {source}")]
    FaceConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
