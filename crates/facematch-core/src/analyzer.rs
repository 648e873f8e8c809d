//! Seam to the external face analysis library.
//!
//! Detection, landmarking and descriptor extraction happen outside this
//! workspace. An analyzer hands back at most one face per source, or
//! `Ok(None)` when the source contains no face, which callers surface as
//! "try again" rather than as a failure.

use crate::types::{BoundingBox, Descriptor, NewFaceRecord, Point};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("observation source not found: {0}")]
    SourceNotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed observation in {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One face as reported by the vision library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub descriptor: Descriptor,
    #[serde(default)]
    pub landmarks: Vec<Point>,
    #[serde(default)]
    pub detection: Option<BoundingBox>,
}

impl FaceObservation {
    /// Turn the observation into a record ready for the store.
    pub fn into_record(self, kind: impl Into<String>) -> NewFaceRecord {
        NewFaceRecord {
            descriptor: Some(self.descriptor),
            landmarks: (!self.landmarks.is_empty()).then_some(self.landmarks),
            detection: self.detection,
            kind: Some(kind.into()),
        }
    }
}

/// Produces zero or one face observation from an image source.
pub trait FaceAnalyzer {
    fn analyze(&mut self, source: &Path) -> Result<Option<FaceObservation>, AnalyzerError>;
}

/// Reads observations precomputed by an external detector.
///
/// The file holds a JSON `FaceObservation`, or `null` when the detector
/// found no face.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObservationFile;

impl FaceAnalyzer for ObservationFile {
    fn analyze(&mut self, source: &Path) -> Result<Option<FaceObservation>, AnalyzerError> {
        let path = source.display().to_string();
        if !source.exists() {
            return Err(AnalyzerError::SourceNotFound(path));
        }

        let raw = std::fs::read_to_string(source).map_err(|source| AnalyzerError::Io {
            path: path.clone(),
            source,
        })?;
        let observation: Option<FaceObservation> = serde_json::from_str(&raw)
            .map_err(|source| AnalyzerError::Malformed {
                path: path.clone(),
                source,
            })?;

        match &observation {
            Some(o) => tracing::debug!(
                path = %path,
                descriptor_len = o.descriptor.len(),
                landmarks = o.landmarks.len(),
                "observation loaded"
            ),
            None => tracing::debug!(path = %path, "observation reports no face"),
        }

        Ok(observation)
    }
}
