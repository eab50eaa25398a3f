use reface_core::{ExecutionBackend, DEFAULT_BATCH_SIZE};
use std::path::PathBuf;
use std::str::FromStr;

const SCRFD_MODEL: &str = "det_10g.onnx";
const ARCFACE_MODEL: &str = "w600k_r50.onnx";
const INSWAPPER_MODEL: &str = "inswapper_128.onnx";
const INSWAPPER_EMAP: &str = "inswapper_emap.bin";
const CODEFORMER_MODEL: &str = "codeformer.onnx";

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Where refaced videos, images and GIFs are written.
    pub output_dir: PathBuf,
    /// Frames per pipeline batch.
    pub batch_size: usize,
    /// Keep every n-th frame in preview mode.
    pub preview_skip_rate: usize,
    /// Cosine similarity threshold used when a face config sets none.
    pub default_threshold: f32,
    /// Cap on crops written by face extraction.
    pub max_extract_faces: usize,
    /// Requested execution backend.
    pub backend: ExecutionBackend,
    /// Run on CPU regardless of `backend`.
    pub force_cpu: bool,
    /// Restore faces of refaced stills when the CodeFormer model is present.
    pub enhance_images: bool,
    /// CodeFormer fidelity weight: 0 favors quality, 1 favors identity.
    pub enhance_fidelity: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            output_dir: PathBuf::from("output"),
            batch_size: DEFAULT_BATCH_SIZE,
            preview_skip_rate: 10,
            default_threshold: 0.2,
            max_extract_faces: 5,
            backend: ExecutionBackend::Cpu,
            force_cpu: false,
            enhance_images: true,
            enhance_fidelity: 0.5,
        }
    }
}

impl Config {
    /// Load configuration from `REFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("REFACE_BACKEND") {
            Some(name) => name.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring REFACE_BACKEND");
                defaults.backend
            }),
            None => defaults.backend,
        };

        Self {
            model_dir: lookup("REFACE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            output_dir: lookup("REFACE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            batch_size: env_parse(&lookup, "REFACE_BATCH_SIZE", defaults.batch_size),
            preview_skip_rate: env_parse(&lookup, "REFACE_PREVIEW_SKIP_RATE", defaults.preview_skip_rate),
            default_threshold: env_parse(&lookup, "REFACE_DEFAULT_THRESHOLD", defaults.default_threshold),
            max_extract_faces: env_parse(&lookup, "REFACE_MAX_EXTRACT_FACES", defaults.max_extract_faces),
            backend,
            force_cpu: env_flag(&lookup, "REFACE_FORCE_CPU", defaults.force_cpu),
            enhance_images: env_flag(&lookup, "REFACE_ENHANCE", defaults.enhance_images),
            enhance_fidelity: env_parse(&lookup, "REFACE_ENHANCE_FIDELITY", defaults.enhance_fidelity),
        }
    }

    /// Backend every inference session runs on.
    pub fn effective_backend(&self) -> ExecutionBackend {
        if self.force_cpu {
            ExecutionBackend::Cpu
        } else {
            self.backend
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path(SCRFD_MODEL)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_path(ARCFACE_MODEL)
    }

    pub fn inswapper_model_path(&self) -> String {
        self.model_path(INSWAPPER_MODEL)
    }

    /// The emap projection exported from the inswapper model.
    pub fn inswapper_emap_path(&self) -> String {
        self.model_path(INSWAPPER_EMAP)
    }

    /// The CodeFormer restoration model, when stills are enhanced and the file exists.
    pub fn codeformer_model_path(&self) -> Option<String> {
        let path = self.model_dir.join(CODEFORMER_MODEL);
        (self.enhance_images && path.exists()).then(|| path.to_string_lossy().into_owned())
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_parse<L, T>(lookup: &L, key: &str, default: T) -> T
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag<L>(lookup: &L, key: &str, default: bool) -> bool
where
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(default)
}

/// `$XDG_DATA_HOME/refacer/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("refacer")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.batch_size, 300);
        assert_eq!(config.preview_skip_rate, 10);
        assert_eq!(config.default_threshold, 0.2);
        assert_eq!(config.max_extract_faces, 5);
        assert_eq!(config.effective_backend(), ExecutionBackend::Cpu);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("REFACE_MODEL_DIR", "/models"),
            ("REFACE_BATCH_SIZE", "64"),
            ("REFACE_DEFAULT_THRESHOLD", "0.35"),
            ("REFACE_BACKEND", "cuda"),
        ]);
        assert_eq!(config.scrfd_model_path(), "/models/det_10g.onnx");
        assert_eq!(config.inswapper_model_path(), "/models/inswapper_128.onnx");
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.default_threshold, 0.35);
        assert_eq!(config.effective_backend(), ExecutionBackend::Cuda);
    }

    #[test]
    fn test_force_cpu_wins_over_backend() {
        let config = config_from(&[("REFACE_BACKEND", "cuda"), ("REFACE_FORCE_CPU", "1")]);
        assert_eq!(config.backend, ExecutionBackend::Cuda);
        assert_eq!(config.effective_backend(), ExecutionBackend::Cpu);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = config_from(&[("REFACE_BATCH_SIZE", "lots"), ("REFACE_BACKEND", "vulkan")]);
        assert_eq!(config.batch_size, 300);
        assert_eq!(config.backend, ExecutionBackend::Cpu);
    }

    #[test]
    fn test_emap_sits_next_to_inswapper() {
        let config = config_from(&[("REFACE_MODEL_DIR", "/models")]);
        assert_eq!(config.inswapper_emap_path(), "/models/inswapper_emap.bin");
    }

    #[test]
    fn test_codeformer_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().to_str().unwrap();
        assert!(config_from(&[("REFACE_MODEL_DIR", model_dir)]).codeformer_model_path().is_none());

        std::fs::write(dir.path().join("codeformer.onnx"), b"model").unwrap();
        let config = config_from(&[("REFACE_MODEL_DIR", model_dir)]);
        assert!(config.codeformer_model_path().unwrap().ends_with("codeformer.onnx"));

        let config = config_from(&[("REFACE_MODEL_DIR", model_dir), ("REFACE_ENHANCE", "false")]);
        assert!(!config.enhance_images);
        assert!(config.codeformer_model_path().is_none());
    }
}
