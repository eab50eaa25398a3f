//! Face configuration: which replacement face goes where.
//!
//! Read from TOML:
//!
//! ```toml
//! [[faces]]
//! destination = "faces/alice.jpg"
//! origin = "faces/bob.jpg"
//! threshold = 0.3
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::RefaceError;

/// One replacement: the face to paste in and, optionally, the face it replaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceConfig {
    /// Image holding the replacement face.
    pub destination: Option<PathBuf>,
    /// Image holding the face to look for in each frame.
    pub origin: Option<PathBuf>,
    pub threshold: Option<f32>,
}

impl FaceConfig {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceConfigFile {
    #[serde(default)]
    pub faces: Vec<FaceConfig>,
}

impl FaceConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RefaceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut file: Self = toml::from_str(&text).map_err(|source| RefaceError::FaceConfig {
            path: path.to_path_buf(),
            source,
        })?;

        // Relative image paths resolve against the config file's directory.
        if let Some(base) = path.parent() {
            for face in &mut file.faces {
                for image in [&mut face.destination, &mut face.origin].into_iter().flatten() {
                    if image.is_relative() {
                        *image = base.join(&*image);
                    }
                }
            }
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_faces() {
        let file: FaceConfigFile = toml::from_str(
            r#"
            [[faces]]
            destination = "alice.jpg"
            origin = "bob.jpg"
            threshold = 0.3

            [[faces]]
            destination = "carol.png"
            "#,
        )
        .unwrap();

        assert_eq!(
            file.faces,
            [
                FaceConfig::new("alice.jpg").with_origin("bob.jpg").with_threshold(0.3),
                FaceConfig::new("carol.png"),
            ]
        );
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.toml");
        std::fs::write(
            &path,
            "[[faces]]\ndestination = \"alice.jpg\"\norigin = \"/abs/bob.jpg\"\n",
        )
        .unwrap();

        let file = FaceConfigFile::load(&path).unwrap();
        assert_eq!(file.faces[0].destination, Some(dir.path().join("alice.jpg")));
        assert_eq!(file.faces[0].origin, Some(PathBuf::from("/abs/bob.jpg")));
    }

    #[test]
    fn test_load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.toml");
        std::fs::write(&path, "[[faces]]\nthreshold = \"high\"\n").unwrap();

        assert!(matches!(
            FaceConfigFile::load(&path),
            Err(RefaceError::FaceConfig { .. })
        ));
    }

    #[test]
    fn test_destinationless_entry_parses() {
        let file: FaceConfigFile = toml::from_str("[[faces]]\norigin = \"bob.jpg\"\n").unwrap();
        assert_eq!(file.faces[0].destination, None);
    }
}
