//! refacer — identity-preserving face replacement for videos and images.
//!
//! [`Refacer`] owns the loaded face models, the selected video encoder and the
//! session configuration. Each request prepares its face configs into an
//! immutable session, then streams frames through the ordered frame pipeline.

pub mod config;
pub mod error;
pub mod face_config;
pub mod image_session;
pub mod models;
pub mod output;
pub mod prepare;
pub mod video_session;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::RefaceError;
pub use face_config::{FaceConfig, FaceConfigFile};
pub use prepare::RefaceOptions;
pub use video_session::{VideoOutcome, VideoPlan};

use reface_core::FaceEngine;
use reface_media::EncoderChoice;

pub struct Refacer {
    engine: FaceEngine,
    config: Config,
    encoder: EncoderChoice,
    workers: usize,
}

impl Refacer {
    /// Load the face models and probe for a video encoder.
    pub fn new(config: Config) -> Result<Self, RefaceError> {
        let engine = models::load_engine(&config)?;
        let encoder = reface_media::probe_encoder();
        Ok(Self::with_engine(engine, config).with_encoder(encoder))
    }

    /// Build around already-loaded ports, with the fallback encoder.
    pub fn with_engine(engine: FaceEngine, config: Config) -> Self {
        let workers = config.effective_backend().worker_count();
        Self {
            engine,
            config,
            encoder: EncoderChoice::default(),
            workers,
        }
    }

    pub fn with_encoder(mut self, encoder: EncoderChoice) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn encoder(&self) -> &EncoderChoice {
        &self.encoder
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}
