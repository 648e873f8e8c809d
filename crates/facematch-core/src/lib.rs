//! facematch-core: Face descriptor records and nearest-match engine.
//!
//! Descriptors come from an external vision library; this crate only
//! stores their shape, measures Euclidean distance between them, ranks
//! candidates and sorts distances into confidence tiers.

pub mod analyzer;
pub mod matcher;
pub mod tier;
pub mod types;

pub use analyzer::{FaceAnalyzer, FaceObservation, ObservationFile};
pub use matcher::{
    EuclideanMatcher, Match, MatchError, MatchFault, MatchReport, Matcher, DEFAULT_MATCH_THRESHOLD,
};
pub use tier::{
    BandsError, ConfidenceBands, ConfidenceTier, TierCounts, DEFAULT_EXCELLENT_BELOW,
    DEFAULT_GOOD_BELOW,
};
pub use types::{
    euclidean_distance, BoundingBox, Descriptor, DimensionMismatch, FaceRecord, NewFaceRecord,
    Point, RecordId, DEFAULT_DESCRIPTOR_LEN,
};
