//! Nearest-descriptor matching.
//!
//! Full scan over the candidate set: every stored descriptor is compared
//! against the query, nothing is indexed.

use crate::types::{Descriptor, DimensionMismatch, FaceRecord, RecordId, DEFAULT_DESCRIPTOR_LEN};
use thiserror::Error;

/// Maximum Euclidean distance still reported as a candidate match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor has {actual} values, expected {expected}")]
    DescriptorLength { expected: usize, actual: usize },
}

/// A stored candidate skipped because its descriptor length is wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchFault {
    pub id: RecordId,
    pub mismatch: DimensionMismatch,
}

/// One candidate within the threshold. Borrows from the candidate slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    pub id: RecordId,
    pub timestamp: &'a str,
    pub distance: f32,
    /// Raw descriptor, for callers that display it.
    pub descriptor: &'a Descriptor,
}

/// Ranked matches plus the candidates that could not be compared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport<'a> {
    /// Closest first.
    pub matches: Vec<Match<'a>>,
    pub faults: Vec<MatchFault>,
}

impl<'a> MatchReport<'a> {
    pub fn best(&self) -> Option<&Match<'a>> {
        self.matches.first()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Strategy for ranking stored records against a query descriptor.
pub trait Matcher {
    fn find_matches<'a>(
        &self,
        query: &Descriptor,
        candidates: &'a [FaceRecord],
        exclude_id: Option<RecordId>,
    ) -> Result<MatchReport<'a>, MatchError>;
}

/// Euclidean distance matcher with a fixed descriptor length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EuclideanMatcher {
    pub threshold: f32,
    pub descriptor_len: usize,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            descriptor_len: DEFAULT_DESCRIPTOR_LEN,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32, descriptor_len: usize) -> Self {
        Self {
            threshold,
            descriptor_len,
        }
    }

    /// Check that a descriptor has the configured length.
    pub fn validate(&self, descriptor: &Descriptor) -> Result<(), MatchError> {
        if descriptor.len() != self.descriptor_len {
            return Err(MatchError::DescriptorLength {
                expected: self.descriptor_len,
                actual: descriptor.len(),
            });
        }
        Ok(())
    }
}

impl Matcher for EuclideanMatcher {
    fn find_matches<'a>(
        &self,
        query: &Descriptor,
        candidates: &'a [FaceRecord],
        exclude_id: Option<RecordId>,
    ) -> Result<MatchReport<'a>, MatchError> {
        self.validate(query)?;

        let mut report = MatchReport::default();

        for record in candidates {
            if exclude_id == Some(record.id) {
                continue;
            }
            let Some(descriptor) = record.usable_descriptor() else {
                continue;
            };

            let distance = match query.euclidean_distance(descriptor) {
                Ok(d) => d,
                Err(mismatch) => {
                    tracing::warn!(
                        id = record.id,
                        expected = mismatch.expected,
                        actual = mismatch.actual,
                        "skipping candidate with corrupt descriptor"
                    );
                    report.faults.push(MatchFault {
                        id: record.id,
                        mismatch,
                    });
                    continue;
                }
            };

            if distance < self.threshold {
                report.matches.push(Match {
                    id: record.id,
                    timestamp: &record.timestamp,
                    distance,
                    descriptor,
                });
            }
        }

        // sort_by is stable: equal distances keep candidate order.
        report
            .matches
            .sort_by(|a, b| a.distance.total_cmp(&b.distance));

        tracing::debug!(
            candidates = candidates.len(),
            matches = report.matches.len(),
            faults = report.faults.len(),
            threshold = self.threshold,
            "match scan complete"
        );

        Ok(report)
    }
}
