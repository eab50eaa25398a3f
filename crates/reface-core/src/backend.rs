//! Execution backend: chosen once at startup, used for every inference session.

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed worker count when an accelerator does the heavy lifting.
const ACCELERATOR_WORKERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionBackend {
    Cpu,
    Cuda,
    CoreMl,
    TensorRt,
}

impl ExecutionBackend {
    /// Frame-pipeline workers for this backend on a machine with `cpus` cores.
    ///
    /// CPU-style backends keep one core free; CUDA is bottlenecked on the
    /// device, so a couple of host threads is enough.
    pub fn worker_count_for(&self, cpus: usize) -> usize {
        match self {
            ExecutionBackend::Cuda => ACCELERATOR_WORKERS,
            _ => cpus.saturating_sub(1).max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count_for(num_cpus::get())
    }

    /// Intra-op threads per ONNX session on a machine with `cpus` cores.
    pub fn intra_threads_for(&self, cpus: usize) -> usize {
        match self {
            ExecutionBackend::Cuda => 1,
            _ => (cpus.saturating_sub(1) / 3).max(1),
        }
    }

    pub fn intra_threads(&self) -> usize {
        self.intra_threads_for(num_cpus::get())
    }

    /// Open an ONNX session for `model_path` with this backend's options.
    pub fn session(&self, model_path: &str) -> Result<Session, ort::Error> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads())?;

        self.register_providers(builder)?.commit_from_file(model_path)
    }

    #[cfg(feature = "cuda")]
    fn register_providers(&self, builder: SessionBuilder) -> Result<SessionBuilder, ort::Error> {
        use ort::execution_providers::CUDAExecutionProvider;

        match self {
            ExecutionBackend::Cuda => {
                builder.with_execution_providers([CUDAExecutionProvider::default().build()])
            }
            _ => Ok(builder),
        }
    }

    #[cfg(not(feature = "cuda"))]
    fn register_providers(&self, builder: SessionBuilder) -> Result<SessionBuilder, ort::Error> {
        if *self != ExecutionBackend::Cpu {
            tracing::warn!(
                backend = %self,
                "built without accelerator support; inference runs on the CPU provider"
            );
        }
        Ok(builder)
    }
}

impl fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionBackend::Cpu => "cpu",
            ExecutionBackend::Cuda => "cuda",
            ExecutionBackend::CoreMl => "coreml",
            ExecutionBackend::TensorRt => "tensorrt",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown execution backend: {0} (expected cpu, cuda, coreml, or tensorrt)")]
pub struct UnknownBackend(String);

impl FromStr for ExecutionBackend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ExecutionBackend::Cpu),
            "cuda" => Ok(ExecutionBackend::Cuda),
            "coreml" => Ok(ExecutionBackend::CoreMl),
            "tensorrt" => Ok(ExecutionBackend::TensorRt),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_keeps_one_core_free() {
        assert_eq!(ExecutionBackend::Cpu.worker_count_for(8), 7);
        assert_eq!(ExecutionBackend::CoreMl.worker_count_for(8), 7);
        assert_eq!(ExecutionBackend::Cpu.worker_count_for(1), 1);
    }

    #[test]
    fn test_cuda_uses_fixed_workers() {
        assert_eq!(ExecutionBackend::Cuda.worker_count_for(64), 2);
        assert_eq!(ExecutionBackend::Cuda.intra_threads_for(64), 1);
    }

    #[test]
    fn test_intra_threads_split() {
        assert_eq!(ExecutionBackend::Cpu.intra_threads_for(16), 5);
        assert_eq!(ExecutionBackend::Cpu.intra_threads_for(2), 1);
    }

    #[test]
    fn test_parse_roundtrip() {
        for b in [
            ExecutionBackend::Cpu,
            ExecutionBackend::Cuda,
            ExecutionBackend::CoreMl,
            ExecutionBackend::TensorRt,
        ] {
            assert_eq!(b.to_string().parse::<ExecutionBackend>().unwrap(), b);
        }
        assert!("vulkan".parse::<ExecutionBackend>().is_err());
        assert_eq!("CUDA".parse::<ExecutionBackend>().unwrap(), ExecutionBackend::Cuda);
    }
}
