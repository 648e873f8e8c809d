use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store-assigned record key.
pub type RecordId = i64;

/// Descriptor length produced by the 128-d face recognition network.
pub const DEFAULT_DESCRIPTOR_LEN: usize = 128;

/// Two descriptors of different lengths were compared.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("descriptor length mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Face descriptor vector (typically 128-dimensional).
///
/// Serialized as a bare JSON array so exports stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Euclidean distance to `other`. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Result<f32, DimensionMismatch> {
        euclidean_distance(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Compute `sqrt(sum((a[i] - b[i])^2))`.
///
/// Lengths are checked up front; a mismatch means stored data is corrupt
/// and must not be papered over by zipping to the shorter vector.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// A 2D facial landmark position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Bounding box of a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A stored face observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<BoundingBox>,
    /// ISO-8601 UTC creation time, stamped by the store.
    pub timestamp: String,
    /// Provenance tag ("scan", "upload"). Exported as `type`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl FaceRecord {
    /// The descriptor, if present and non-empty.
    pub fn usable_descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref().filter(|d| !d.is_empty())
    }

    pub fn has_descriptor(&self) -> bool {
        self.usable_descriptor().is_some()
    }
}

/// Caller-supplied fields of a record; the store assigns `id` and `timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFaceRecord {
    pub descriptor: Option<Descriptor>,
    pub landmarks: Option<Vec<Point>>,
    pub detection: Option<BoundingBox>,
    pub kind: Option<String>,
}

impl NewFaceRecord {
    /// Attach the store-assigned identity.
    pub fn into_record(self, id: RecordId, timestamp: String) -> FaceRecord {
        FaceRecord {
            id,
            descriptor: self.descriptor,
            landmarks: self.landmarks,
            detection: self.detection,
            timestamp,
            kind: self.kind,
        }
    }
}
