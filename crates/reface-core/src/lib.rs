//! reface-core — face matching and frame orchestration for face replacement.
//!
//! The matcher and frame pipeline work against the inference ports
//! (detection, embedding, swap, and optional enhancement). SCRFD, ArcFace,
//! inswapper and CodeFormer implementations of those ports run via ONNX Runtime.

pub mod alignment;
pub mod backend;
pub mod detector;
pub mod enhancer;
pub mod matcher;
pub mod pipeline;
pub mod ports;
pub mod processor;
pub mod recognizer;
pub mod session_pool;
pub mod swapper;
pub mod types;

pub use backend::ExecutionBackend;
pub use detector::FaceDetector;
pub use enhancer::FaceEnhancer;
pub use matcher::{MatchMode, Pairing, ReplacementSpec, SessionConfig, SessionError};
pub use pipeline::{FramePipeline, PipelineReport, DEFAULT_BATCH_SIZE};
pub use rayon::ThreadPoolBuildError;
pub use ports::{FaceDetection, FaceEmbedding, FaceEngine, FaceEnhance, FaceSwap, PortError};
pub use processor::FrameProcessor;
pub use recognizer::FaceRecognizer;
pub use session_pool::{SessionPool, SessionPoolError};
pub use swapper::FaceSwapper;
pub use types::{BoundingBox, Embedding, FaceRecord, Frame, Landmarks};
