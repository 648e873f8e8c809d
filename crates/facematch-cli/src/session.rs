use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use facematch_core::{
    ConfidenceBands, ConfidenceTier, Descriptor, EuclideanMatcher, FaceObservation, FaceRecord,
    MatchError, MatchFault, MatchReport, Matcher, RecordId, TierCounts,
};
use facematch_store::backup::{self, backup_file_name};
use facematch_store::{BackupDocument, BackupError, DescriptorStore, RestoreSummary, StoreError};
use serde::Serialize;
use thiserror::Error;

/// Number of raw descriptor values kept for display.
const DESCRIPTOR_PREVIEW_LEN: usize = 10;

/// Days covered by the dashboard's scans-per-day series.
const DAILY_WINDOW_DAYS: i64 = 7;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("record {0} has no descriptor to compare")]
    MissingDescriptor(RecordId),
}

impl SessionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

/// A match with its confidence tier, detached from the gallery it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedMatch {
    pub id: RecordId,
    pub timestamp: String,
    pub distance: f32,
    pub tier: ConfidenceTier,
    /// First few descriptor values.
    pub preview: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub matches: Vec<ClassifiedMatch>,
    pub faults: Vec<MatchFault>,
    /// Records that had a descriptor and could be compared.
    pub compared: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub record: FaceRecord,
    pub outcome: SearchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub total: usize,
    pub recent: Vec<FaceRecord>,
    /// Oldest day first, ending at the requested day.
    pub daily_scans: Vec<(NaiveDate, usize)>,
    /// Tier of each record's closest other match, for records that have one.
    pub tiers: TierCounts,
    /// Records whose descriptor has the wrong length.
    pub corrupt: usize,
}

/// Everything one run of the tool works with: the store, the matching
/// parameters and the lazily loaded gallery.
///
/// Writes made through the session drop the cached gallery; the next read
/// loads it again.
pub struct Session {
    store: DescriptorStore,
    matcher: EuclideanMatcher,
    bands: ConfidenceBands,
    recent_limit: usize,
    gallery: Option<Vec<FaceRecord>>,
}

impl Session {
    pub fn new(
        store: DescriptorStore,
        matcher: EuclideanMatcher,
        bands: ConfidenceBands,
        recent_limit: usize,
    ) -> Self {
        Self {
            store,
            matcher,
            bands,
            recent_limit,
            gallery: None,
        }
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn bands(&self) -> ConfidenceBands {
        self.bands
    }

    pub fn matcher(&self) -> EuclideanMatcher {
        self.matcher
    }

    /// Drop the cached gallery.
    pub fn invalidate(&mut self) {
        if self.gallery.take().is_some() {
            tracing::debug!("gallery cache invalidated");
        }
    }

    async fn ensure_gallery(&mut self) -> Result<(), SessionError> {
        if self.gallery.is_none() {
            let records = self.store.get_all().await?;
            tracing::info!(
                records = records.len(),
                with_descriptor = records.iter().filter(|r| r.has_descriptor()).count(),
                "gallery loaded"
            );
            self.gallery = Some(records);
        }
        Ok(())
    }

    fn gallery(&self) -> &[FaceRecord] {
        self.gallery.as_deref().unwrap_or(&[])
    }

    fn classify(&self, report: MatchReport<'_>, compared: usize) -> SearchOutcome {
        let matches = report
            .matches
            .iter()
            .map(|m| ClassifiedMatch {
                id: m.id,
                timestamp: m.timestamp.to_string(),
                distance: m.distance,
                tier: self.bands.classify(m.distance),
                preview: m
                    .descriptor
                    .values()
                    .iter()
                    .take(DESCRIPTOR_PREVIEW_LEN)
                    .copied()
                    .collect(),
            })
            .collect();
        SearchOutcome {
            matches,
            faults: report.faults,
            compared,
        }
    }

    /// Store a freshly observed face. The descriptor must have the model's length.
    pub async fn enroll(
        &mut self,
        observation: FaceObservation,
        kind: &str,
    ) -> Result<RecordId, SessionError> {
        self.matcher.validate(&observation.descriptor)?;
        let id = self.store.create(observation.into_record(kind)).await?;
        self.invalidate();
        Ok(id)
    }

    pub async fn record(&self, id: RecordId) -> Result<FaceRecord, SessionError> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// Compare a stored record against every other stored record.
    pub async fn scan_result(&mut self, id: RecordId) -> Result<ScanResult, SessionError> {
        let record = self.store.get_by_id(id).await?;
        let query = record
            .usable_descriptor()
            .cloned()
            .ok_or(SessionError::MissingDescriptor(id))?;

        self.ensure_gallery().await?;
        let gallery = self.gallery();
        let compared = gallery
            .iter()
            .filter(|r| r.id != id && r.has_descriptor())
            .count();
        let report = self.matcher.find_matches(&query, gallery, Some(id))?;
        let outcome = self.classify(report, compared);

        tracing::info!(id, compared, matches = outcome.matches.len(), "scan result computed");
        Ok(ScanResult { record, outcome })
    }

    /// Compare a query descriptor against the whole gallery.
    pub async fn search(&mut self, query: &Descriptor) -> Result<SearchOutcome, SessionError> {
        self.ensure_gallery().await?;
        let gallery = self.gallery();
        let compared = gallery.iter().filter(|r| r.has_descriptor()).count();
        let report = self.matcher.find_matches(query, gallery, None)?;
        let outcome = self.classify(report, compared);

        tracing::info!(compared, matches = outcome.matches.len(), "search complete");
        Ok(outcome)
    }

    /// Most recent records first, at most `limit`.
    pub async fn recent(&mut self, limit: usize) -> Result<Vec<FaceRecord>, SessionError> {
        self.ensure_gallery().await?;
        Ok(most_recent(self.gallery(), limit))
    }

    pub async fn dashboard(&mut self, today: NaiveDate) -> Result<Dashboard, SessionError> {
        self.ensure_gallery().await?;
        let gallery = self.gallery();

        let mut tiers = TierCounts::default();
        let mut corrupt = 0;
        for record in gallery {
            let Some(descriptor) = record.usable_descriptor() else {
                continue;
            };
            if self.matcher.validate(descriptor).is_err() {
                corrupt += 1;
                continue;
            }
            let report = self.matcher.find_matches(descriptor, gallery, Some(record.id))?;
            if let Some(best) = report.best() {
                tiers.record(self.bands.classify(best.distance));
            }
        }

        Ok(Dashboard {
            total: gallery.len(),
            recent: most_recent(gallery, self.recent_limit),
            daily_scans: daily_scans(gallery, today),
            tiers,
            corrupt,
        })
    }

    /// Export file name for `today` and the pretty-printed document.
    pub async fn backup(&self, today: NaiveDate) -> Result<(String, String), SessionError> {
        let document = backup::export(&self.store).await?;
        Ok((backup_file_name(today), document.to_json_pretty()?))
    }

    pub async fn restore(&mut self, raw: &str) -> Result<RestoreSummary, SessionError> {
        let document = BackupDocument::from_json(raw)?;
        let summary = backup::restore(&self.store, &document).await;
        self.invalidate();
        Ok(summary?)
    }
}

fn parse_timestamp(timestamp: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(timestamp).ok()
}

/// Newest first; records with unparseable timestamps sort last.
fn most_recent(records: &[FaceRecord], limit: usize) -> Vec<FaceRecord> {
    let mut sorted: Vec<&FaceRecord> = records.iter().collect();
    sorted.sort_by(|a, b| parse_timestamp(&b.timestamp).cmp(&parse_timestamp(&a.timestamp)));
    sorted.into_iter().take(limit).cloned().collect()
}

fn daily_scans(records: &[FaceRecord], today: NaiveDate) -> Vec<(NaiveDate, usize)> {
    let mut days: Vec<(NaiveDate, usize)> = (0..DAILY_WINDOW_DAYS)
        .rev()
        .map(|back| (today - Duration::days(back), 0))
        .collect();

    for record in records {
        let Some(day) = parse_timestamp(&record.timestamp)
            .map(|ts| ts.with_timezone(&Utc).date_naive())
        else {
            continue;
        };
        if let Some(slot) = days.iter_mut().find(|(d, _)| *d == day) {
            slot.1 += 1;
        }
    }
    days
}
