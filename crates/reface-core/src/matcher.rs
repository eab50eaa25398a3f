//! Pairing detected faces with configured replacements.
//!
//! [`SessionConfig`] is built once before any frame is processed and shared
//! read-only with every worker. [`SessionConfig::pair`] is pure: it looks at
//! one frame's faces and returns which replacement goes onto which face.

use crate::types::{Embedding, FaceRecord};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SessionError {
    #[error("no replacement faces configured")]
    NoReplacementSpecs,
}

/// One configured swap rule.
#[derive(Debug, Clone)]
pub struct ReplacementSpec {
    /// Identity to look for. `None` matches any face.
    pub origin: Option<Embedding>,
    /// Identity to paste onto matched faces.
    pub replacement: FaceRecord,
    /// Minimum similarity to accept a match. Always 0 when `origin` is `None`.
    pub threshold: f32,
}

impl ReplacementSpec {
    pub fn targeted(origin: Embedding, replacement: FaceRecord, threshold: f32) -> Self {
        Self {
            origin: Some(origin),
            replacement,
            threshold,
        }
    }

    pub fn any_face(replacement: FaceRecord) -> Self {
        Self {
            origin: None,
            replacement,
            threshold: 0.0,
        }
    }
}

/// Matching policy, resolved once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// The first replacement goes onto every detected face.
    FirstFace,
    /// Faces sorted left to right; i-th replacement onto i-th face.
    MultipleFaces,
    /// Like `FirstFace`, reached through the explicit flag.
    SimilarityDisabled,
    /// Each replacement claims at most one face whose similarity clears its threshold.
    Similarity,
}

impl MatchMode {
    /// Whether detected faces need embeddings before pairing.
    pub fn needs_embeddings(&self) -> bool {
        matches!(self, MatchMode::Similarity)
    }
}

/// A decision to composite `specs[spec]` onto `faces[face]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pairing {
    pub face: usize,
    pub spec: usize,
}

/// Immutable per-session matching configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    specs: Vec<ReplacementSpec>,
    first_face: bool,
    multiple_faces: bool,
    disable_similarity: bool,
}

impl SessionConfig {
    /// Build the session configuration.
    ///
    /// `first_face` is derived: set when not in multiple-faces mode and either
    /// the first spec has no origin or similarity is disabled.
    pub fn new(
        specs: Vec<ReplacementSpec>,
        multiple_faces: bool,
        disable_similarity: bool,
    ) -> Result<Self, SessionError> {
        let first = specs.first().ok_or(SessionError::NoReplacementSpecs)?;
        let first_face = !multiple_faces && (first.origin.is_none() || disable_similarity);

        Ok(Self {
            specs,
            first_face,
            multiple_faces,
            disable_similarity,
        })
    }

    pub fn specs(&self) -> &[ReplacementSpec] {
        &self.specs
    }

    pub fn first_face(&self) -> bool {
        self.first_face
    }

    pub fn mode(&self) -> MatchMode {
        if self.first_face {
            MatchMode::FirstFace
        } else if self.multiple_faces {
            MatchMode::MultipleFaces
        } else if self.disable_similarity {
            MatchMode::SimilarityDisabled
        } else {
            MatchMode::Similarity
        }
    }

    /// Decide which replacement goes onto which detected face.
    ///
    /// Pairings are returned in the order composites must be applied.
    /// `similarity` is only called in [`MatchMode::Similarity`], and never
    /// with a missing origin.
    pub fn pair<S>(&self, faces: &[FaceRecord], similarity: S) -> Vec<Pairing>
    where
        S: Fn(&Embedding, &Embedding) -> f32,
    {
        if faces.is_empty() {
            return Vec::new();
        }

        match self.mode() {
            MatchMode::FirstFace | MatchMode::SimilarityDisabled => {
                (0..faces.len()).map(|face| Pairing { face, spec: 0 }).collect()
            }
            MatchMode::MultipleFaces => pair_left_to_right(faces, self.specs.len()),
            MatchMode::Similarity => pair_by_similarity(faces, &self.specs, similarity),
        }
    }
}

fn pair_left_to_right(faces: &[FaceRecord], spec_count: usize) -> Vec<Pairing> {
    let mut order: Vec<usize> = (0..faces.len()).collect();
    // Stable sort: faces sharing an x1 keep detection order.
    // NaN coordinates sort after every finite x1.
    order.sort_by(|&a, &b| faces[a].bbox.x1.total_cmp(&faces[b].bbox.x1));

    order
        .into_iter()
        .zip(0..spec_count)
        .map(|(face, spec)| Pairing { face, spec })
        .collect()
}

fn pair_by_similarity<S>(faces: &[FaceRecord], specs: &[ReplacementSpec], similarity: S) -> Vec<Pairing>
where
    S: Fn(&Embedding, &Embedding) -> f32,
{
    let mut claimed = vec![false; faces.len()];
    let mut pairings = Vec::new();

    for (spec_idx, spec) in specs.iter().enumerate() {
        let hit = (0..faces.len()).rev().find(|&i| {
            if claimed[i] {
                return false;
            }
            match (&spec.origin, &faces[i].embedding) {
                (None, _) => true,
                (Some(origin), Some(embedding)) => similarity(origin, embedding) >= spec.threshold,
                (Some(_), None) => false,
            }
        });

        if let Some(face) = hit {
            claimed[face] = true;
            pairings.push(Pairing { face, spec: spec_idx });
        }
    }

    pairings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use std::cell::Cell;

    fn face_at(x: f32, embedding: Option<Vec<f32>>) -> FaceRecord {
        FaceRecord {
            bbox: BoundingBox::new(x, 0.0, x + 40.0, 40.0),
            keypoints: None,
            score: 0.9,
            embedding: embedding.map(Embedding::new),
        }
    }

    fn replacement() -> FaceRecord {
        face_at(0.0, Some(vec![0.0, 0.0, 1.0]))
    }

    /// Similarity is read straight from the first component of the face embedding,
    /// so tests can dial in exact scores.
    fn scripted(_origin: &Embedding, face: &Embedding) -> f32 {
        face.values[0]
    }

    #[test]
    fn test_requires_at_least_one_spec() {
        let err = SessionConfig::new(vec![], false, false).unwrap_err();
        assert_eq!(err, SessionError::NoReplacementSpecs);
    }

    #[test]
    fn test_mode_resolution() {
        let targeted = || ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.3);

        let cfg = SessionConfig::new(vec![ReplacementSpec::any_face(replacement())], false, false).unwrap();
        assert!(cfg.first_face());
        assert_eq!(cfg.mode(), MatchMode::FirstFace);

        let cfg = SessionConfig::new(vec![targeted()], false, true).unwrap();
        assert!(cfg.first_face());
        assert_eq!(cfg.mode(), MatchMode::FirstFace);

        let cfg = SessionConfig::new(vec![ReplacementSpec::any_face(replacement())], true, true).unwrap();
        assert!(!cfg.first_face());
        assert_eq!(cfg.mode(), MatchMode::MultipleFaces);

        let cfg = SessionConfig::new(vec![targeted()], false, false).unwrap();
        assert_eq!(cfg.mode(), MatchMode::Similarity);
        assert!(cfg.mode().needs_embeddings());
    }

    #[test]
    fn test_empty_frame_has_no_pairings() {
        let cfg = SessionConfig::new(vec![ReplacementSpec::any_face(replacement())], false, false).unwrap();
        assert!(cfg.pair(&[], scripted).is_empty());
    }

    #[test]
    fn test_first_face_pairs_every_face_in_detection_order() {
        let cfg = SessionConfig::new(vec![ReplacementSpec::any_face(replacement())], false, false).unwrap();
        let faces = vec![face_at(300.0, None), face_at(10.0, None), face_at(150.0, None)];

        let pairs = cfg.pair(&faces, |_, _| panic!("no similarity in first-face mode"));
        assert_eq!(
            pairs,
            vec![
                Pairing { face: 0, spec: 0 },
                Pairing { face: 1, spec: 0 },
                Pairing { face: 2, spec: 0 },
            ]
        );
    }

    #[test]
    fn test_multiple_faces_left_to_right() {
        let specs = vec![
            ReplacementSpec::any_face(replacement()),
            ReplacementSpec::any_face(replacement()),
        ];
        let cfg = SessionConfig::new(specs, true, false).unwrap();
        let faces = vec![face_at(50.0, None), face_at(150.0, None), face_at(10.0, None)];

        let pairs = cfg.pair(&faces, |_, _| panic!("no similarity in multiple-faces mode"));
        // A -> x=10 (index 2), B -> x=50 (index 0), x=150 untouched.
        assert_eq!(
            pairs,
            vec![Pairing { face: 2, spec: 0 }, Pairing { face: 0, spec: 1 }]
        );
    }

    #[test]
    fn test_multiple_faces_tolerates_nan_coordinates() {
        let specs: Vec<ReplacementSpec> = (0..40).map(|_| ReplacementSpec::any_face(replacement())).collect();
        let cfg = SessionConfig::new(specs, true, false).unwrap();
        let mut faces: Vec<FaceRecord> = (0..40).map(|i| face_at((40 - i) as f32 * 10.0, None)).collect();
        for i in [0, 5, 12, 20, 33, 39] {
            faces[i].bbox.x1 = f32::NAN;
        }

        let pairs = cfg.pair(&faces, scripted);
        assert_eq!(pairs.len(), 40);
        // Finite faces come first, left to right: face 38 sits at x = 20.
        assert_eq!(pairs[0], Pairing { face: 38, spec: 0 });
        let nan_faces: Vec<usize> = pairs[34..].iter().map(|p| p.face).collect();
        assert_eq!(nan_faces, [0, 5, 12, 20, 33, 39]);
    }

    #[test]
    fn test_multiple_faces_more_specs_than_faces() {
        let specs = vec![
            ReplacementSpec::any_face(replacement()),
            ReplacementSpec::any_face(replacement()),
            ReplacementSpec::any_face(replacement()),
        ];
        let cfg = SessionConfig::new(specs, true, false).unwrap();
        let faces = vec![face_at(80.0, None)];

        assert_eq!(cfg.pair(&faces, scripted), vec![Pairing { face: 0, spec: 0 }]);
    }

    #[test]
    fn test_similarity_threshold_boundary() {
        let spec = ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.5);
        let cfg = SessionConfig::new(vec![spec], false, false).unwrap();

        let at = vec![face_at(0.0, Some(vec![0.5]))];
        assert_eq!(cfg.pair(&at, scripted), vec![Pairing { face: 0, spec: 0 }]);

        let below = vec![face_at(0.0, Some(vec![0.5 - f32::EPSILON]))];
        assert!(cfg.pair(&below, scripted).is_empty());
    }

    #[test]
    fn test_similarity_scans_in_reverse_detection_order() {
        let spec = ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.4);
        let cfg = SessionConfig::new(vec![spec], false, false).unwrap();
        let faces = vec![
            face_at(0.0, Some(vec![0.9])),
            face_at(100.0, Some(vec![0.1])),
            face_at(200.0, Some(vec![0.5])),
        ];

        // Both 0 and 2 pass; the reverse scan reaches 2 first.
        assert_eq!(cfg.pair(&faces, scripted), vec![Pairing { face: 2, spec: 0 }]);
    }

    #[test]
    fn test_similarity_consumes_matched_faces() {
        let specs = vec![
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.4),
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.4),
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.4),
        ];
        let cfg = SessionConfig::new(specs, false, false).unwrap();
        let faces = vec![face_at(0.0, Some(vec![0.8])), face_at(100.0, Some(vec![0.7]))];

        let pairs = cfg.pair(&faces, scripted);
        assert_eq!(
            pairs,
            vec![Pairing { face: 1, spec: 0 }, Pairing { face: 0, spec: 1 }]
        );

        // No face or spec appears twice.
        let mut seen_faces: Vec<usize> = pairs.iter().map(|p| p.face).collect();
        let mut seen_specs: Vec<usize> = pairs.iter().map(|p| p.spec).collect();
        seen_faces.sort_unstable();
        seen_faces.dedup();
        seen_specs.sort_unstable();
        seen_specs.dedup();
        assert_eq!(seen_faces.len(), pairs.len());
        assert_eq!(seen_specs.len(), pairs.len());
    }

    #[test]
    fn test_similarity_unmatched_spec_is_skipped() {
        let specs = vec![
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.95),
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.3),
        ];
        let cfg = SessionConfig::new(specs, false, false).unwrap();
        let faces = vec![face_at(0.0, Some(vec![0.6]))];

        assert_eq!(cfg.pair(&faces, scripted), vec![Pairing { face: 0, spec: 1 }]);
    }

    #[test]
    fn test_similarity_is_deterministic() {
        let specs = vec![
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.2),
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.2),
        ];
        let cfg = SessionConfig::new(specs, false, false).unwrap();
        let faces: Vec<FaceRecord> = (0..6)
            .map(|i| face_at(i as f32 * 50.0, Some(vec![0.1 * i as f32])))
            .collect();

        let first = cfg.pair(&faces, scripted);
        for _ in 0..10 {
            assert_eq!(cfg.pair(&faces, scripted), first);
        }
    }

    #[test]
    fn test_similarity_originless_spec_never_compares() {
        let specs = vec![
            ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.5),
            ReplacementSpec::any_face(replacement()),
        ];
        let cfg = SessionConfig::new(specs, false, false).unwrap();
        assert_eq!(cfg.mode(), MatchMode::Similarity);

        let calls = Cell::new(0);
        let faces = vec![face_at(0.0, Some(vec![0.9])), face_at(100.0, Some(vec![0.1]))];
        let pairs = cfg.pair(&faces, |o, f| {
            calls.set(calls.get() + 1);
            scripted(o, f)
        });

        assert_eq!(
            pairs,
            vec![Pairing { face: 0, spec: 0 }, Pairing { face: 1, spec: 1 }]
        );
        // Only the targeted spec compared: face 1 (0.1) then face 0 (0.9).
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_similarity_skips_faces_without_embedding() {
        let spec = ReplacementSpec::targeted(Embedding::new(vec![1.0]), replacement(), 0.0);
        let cfg = SessionConfig::new(vec![spec], false, false).unwrap();
        let faces = vec![face_at(0.0, Some(vec![0.3])), face_at(100.0, None)];

        assert_eq!(cfg.pair(&faces, scripted), vec![Pairing { face: 0, spec: 0 }]);
    }
}
