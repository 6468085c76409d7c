//! Ingestion pipeline: one run per source.
//!
//! # Run Sequence
//!
//! 1. Authenticate (retried). Failure ends the run with [`PipelineError`].
//! 2. List recent candidates (retried). Failure is logged and ends the run
//!    with an empty summary; other sources are unaffected.
//! 3. Sort newest first by the adapter's [`RecencyKey`], keep `limit`, then
//!    walk them oldest to newest so stored order follows publication order.
//! 4. Per candidate: skip known ids, pause, fetch the detail (retried),
//!    merge and normalize, resolve the download link, check again, insert.
//!
//! A failure at step 4 only loses that candidate. The store's unique index is
//! what keeps records single; the `exists` checks just avoid wasted fetches.
//!
//! [`RecencyKey`]: crate::sources::RecencyKey

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::error::PipelineError;
use crate::models::{
    CandidateRef, NO_DOWNLOAD, RawDetail, UNKNOWN_DATE, UNTITLED_VIDEO, VideoRecord, ZERO_DURATION,
    non_empty,
};
use crate::normalize::{DateFormat, normalize_date_at, normalize_duration};
use crate::retry::RetryPolicy;
use crate::sources::{RecencyKey, SourceAdapter};
use crate::store::RecordStore;
use crate::utils::random_pause;

pub const DEFAULT_LIMIT: usize = 5;
pub const DEFAULT_PAUSE_MIN: Duration = Duration::from_millis(500);
pub const DEFAULT_PAUSE_MAX: Duration = Duration::from_millis(1500);

/// Counters for one source run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Candidates returned by the listing, before `limit` was applied.
    pub listed: usize,
    pub already_known: usize,
    pub skipped_empty: usize,
    /// Detail pages that lacked a required element.
    pub no_detail: usize,
    pub failed: usize,
    pub inserted: usize,
}

/// What happened to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Inserted,
    AlreadyKnown,
    SkippedEmpty,
    NoDetail,
    Failed,
}

impl RunSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::AlreadyKnown => self.already_known += 1,
            Outcome::SkippedEmpty => self.skipped_empty += 1,
            Outcome::NoDetail => self.no_detail += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// Drives a [`SourceAdapter`] into a [`RecordStore`].
#[derive(Debug, Clone, Copy)]
pub struct IngestionPipeline {
    retry: RetryPolicy,
    limit: usize,
    pause_min: Duration,
    pause_max: Duration,
}

impl Default for IngestionPipeline {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_LIMIT)
    }
}

impl IngestionPipeline {
    pub fn new(retry: RetryPolicy, limit: usize) -> Self {
        Self {
            retry,
            limit,
            pause_min: DEFAULT_PAUSE_MIN,
            pause_max: DEFAULT_PAUSE_MAX,
        }
    }

    /// Random pause range before each detail fetch. `ZERO..ZERO` disables it.
    pub fn with_pause(mut self, min: Duration, max: Duration) -> Self {
        self.pause_min = min;
        self.pause_max = max;
        self
    }

    #[instrument(level = "info", skip_all, fields(source = adapter.name(), limit = self.limit))]
    pub async fn run<A, S>(&self, adapter: &A, store: &S) -> Result<RunSummary, PipelineError>
    where
        A: SourceAdapter,
        S: RecordStore,
    {
        let mut summary = RunSummary::default();

        self.retry
            .run("authenticate", || adapter.authenticate())
            .await
            .map_err(|cause| PipelineError::Authentication {
                source_name: adapter.name().to_string(),
                cause,
            })?;

        let candidates = match self
            .retry
            .run("list recent videos", || adapter.list_recent(self.limit))
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to retrieve video list; ending run for this source");
                return Ok(summary);
            }
        };
        summary.listed = candidates.len();

        for candidate in order_candidates(candidates, adapter.recency_key(), self.limit) {
            let outcome = self.ingest_one(adapter, store, &candidate).await;
            summary.record(outcome);
        }

        info!(
            listed = summary.listed,
            inserted = summary.inserted,
            already_known = summary.already_known,
            skipped_empty = summary.skipped_empty,
            no_detail = summary.no_detail,
            failed = summary.failed,
            "Source run complete"
        );
        Ok(summary)
    }

    async fn ingest_one<A, S>(&self, adapter: &A, store: &S, candidate: &CandidateRef) -> Outcome
    where
        A: SourceAdapter,
        S: RecordStore,
    {
        let candidate_id = candidate.source_id.trim();
        if candidate_id.is_empty() {
            warn!(url = %candidate.detail_url, "Candidate has no id; skipping");
            return Outcome::SkippedEmpty;
        }

        match store.exists(candidate_id).await {
            Ok(true) => {
                info!(source_id = candidate_id, "Video already in database, skipping");
                return Outcome::AlreadyKnown;
            }
            Ok(false) => {}
            Err(e) => {
                error!(source_id = candidate_id, error = %e, "Existence check failed");
                return Outcome::Failed;
            }
        }

        random_pause(self.pause_min, self.pause_max).await;

        let detail = match self
            .retry
            .run("fetch detail", || adapter.fetch_detail(candidate))
            .await
        {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                warn!(source_id = candidate_id, url = %candidate.detail_url, "No usable metadata on detail page");
                return Outcome::NoDetail;
            }
            Err(e) => {
                error!(source_id = candidate_id, exhausted = e.is_exhausted(), error = %e, "Failed to get metadata");
                return Outcome::Failed;
            }
        };

        let mut record = build_record(
            adapter.name(),
            adapter.date_format(),
            candidate,
            detail,
            Utc::now(),
        );

        if record.download_url != NO_DOWNLOAD {
            let url = record.download_url.clone();
            match self
                .retry
                .run("resolve download link", || adapter.resolve_download_url(&url))
                .await
            {
                Ok(resolved) => record.download_url = resolved,
                Err(e) => {
                    warn!(source_id = %record.source_id, error = %e, "Keeping unresolved download link");
                }
            }
        }

        match store.exists(&record.source_id).await {
            Ok(true) => {
                info!(source_id = %record.source_id, "Video already saved, skipping");
                return Outcome::AlreadyKnown;
            }
            Ok(false) => {}
            Err(e) => {
                error!(source_id = %record.source_id, error = %e, "Existence check failed");
                return Outcome::Failed;
            }
        }

        match store.insert_if_absent(&record).await {
            Ok(true) => {
                info!(
                    source_id = %record.source_id,
                    published = %record.published_date,
                    duration = %record.duration,
                    "Saved metadata"
                );
                Outcome::Inserted
            }
            Ok(false) => {
                info!(source_id = %record.source_id, "Stored concurrently by another run");
                Outcome::AlreadyKnown
            }
            Err(e) => {
                error!(source_id = %record.source_id, error = %e, "Failed to save metadata");
                Outcome::Failed
            }
        }
    }
}

/// Newest `limit` candidates, returned oldest first.
pub fn order_candidates(
    mut candidates: Vec<CandidateRef>,
    key: RecencyKey,
    limit: usize,
) -> Vec<CandidateRef> {
    key.sort_newest_first(&mut candidates);
    candidates.truncate(limit);
    candidates.reverse();
    candidates
}

/// Merge detail fields over listing hints and normalize them.
///
/// Detail values win; a detail value that normalizes to a sentinel gives the
/// listing hint a chance before the sentinel is kept.
pub fn build_record(
    provider: &str,
    format: DateFormat,
    candidate: &CandidateRef,
    detail: RawDetail,
    now: DateTime<Utc>,
) -> VideoRecord {
    let personalities = detail.joined_personalities();
    let hints = &candidate.hints;

    let published_date = first_real(
        [non_empty(detail.published), non_empty(hints.published.clone())],
        UNKNOWN_DATE,
        |raw| normalize_date_at(raw, format, now),
    );
    let duration = first_real(
        [non_empty(detail.duration), non_empty(hints.duration.clone())],
        ZERO_DURATION,
        normalize_duration,
    );

    VideoRecord {
        source_id: non_empty(detail.source_id).unwrap_or_else(|| candidate.source_id.trim().to_string()),
        content_provider: provider.to_string(),
        published_date,
        title: non_empty(detail.title)
            .or_else(|| non_empty(hints.title.clone()))
            .unwrap_or_else(|| UNTITLED_VIDEO.to_string()),
        description: non_empty(detail.description).unwrap_or_default(),
        personalities,
        duration,
        download_url: non_empty(detail.download_url).unwrap_or_else(|| NO_DOWNLOAD.to_string()),
        analysis_id: None,
    }
}

/// Normalize candidates in order and keep the first that is not `sentinel`.
fn first_real<const N: usize>(
    raws: [Option<String>; N],
    sentinel: &str,
    normalize: impl Fn(Option<&str>) -> String,
) -> String {
    raws.iter()
        .flatten()
        .map(|raw| normalize(Some(raw.as_str())))
        .find(|value| value != sentinel)
        .unwrap_or_else(|| sentinel.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{ScrapeError, StoreError};
    use crate::models::{ListingHints, PendingRecord};
    use crate::store::SqliteRecordStore;
    use crate::store::tests::record;
    use chrono::{TimeDelta, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted adapter. Details not in the map fail with a timeout.
    #[derive(Default)]
    pub(crate) struct FakeAdapter {
        pub candidates: Vec<CandidateRef>,
        pub details: HashMap<String, Option<RawDetail>>,
        pub list_fails: bool,
        pub auth_rejected: bool,
        pub resolve_fails: bool,
        pub fetched: Mutex<Vec<String>>,
        pub list_calls: AtomicU32,
    }

    impl FakeAdapter {
        pub(crate) fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            "EU Commission"
        }

        fn recency_key(&self) -> RecencyKey {
            RecencyKey::PagePosition
        }

        fn date_format(&self) -> DateFormat {
            DateFormat::DayMonthYear
        }

        async fn authenticate(&self) -> Result<(), ScrapeError> {
            if self.auth_rejected {
                Err(ScrapeError::Authentication("bad password".to_string()))
            } else {
                Ok(())
            }
        }

        async fn list_recent(&self, _limit: usize) -> Result<Vec<CandidateRef>, ScrapeError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.list_fails {
                return Err(ScrapeError::Timeout {
                    what: "listing".to_string(),
                    timeout_ms: 1,
                });
            }
            Ok(self.candidates.clone())
        }

        async fn fetch_detail(
            &self,
            candidate: &CandidateRef,
        ) -> Result<Option<RawDetail>, ScrapeError> {
            self.fetched.lock().unwrap().push(candidate.source_id.clone());
            self.details
                .get(&candidate.source_id)
                .cloned()
                .ok_or_else(|| ScrapeError::Timeout {
                    what: candidate.detail_url.clone(),
                    timeout_ms: 1,
                })
        }

        async fn resolve_download_url(&self, url: &str) -> Result<String, ScrapeError> {
            if self.resolve_fails {
                Err(ScrapeError::Http {
                    status: reqwest::StatusCode::NOT_FOUND,
                    url: url.to_string(),
                })
            } else {
                Ok(url.replace("/redirect/", "/files/"))
            }
        }
    }

    pub(crate) fn fast_pipeline() -> IngestionPipeline {
        IngestionPipeline::new(RetryPolicy::new(2, Duration::from_millis(1)), DEFAULT_LIMIT)
            .with_pause(Duration::ZERO, Duration::ZERO)
    }

    pub(crate) fn detail(title: &str, duration: &str, published: &str) -> RawDetail {
        RawDetail {
            title: Some(title.to_string()),
            duration: Some(duration.to_string()),
            published: Some(published.to_string()),
            download_url: Some(format!("https://example.org/redirect/{title}.mp4")),
            ..RawDetail::default()
        }
    }

    fn ids(candidates: &[CandidateRef]) -> Vec<&str> {
        candidates.iter().map(|c| c.source_id.as_str()).collect()
    }

    #[test]
    fn test_order_candidates_takes_newest_then_reverses() {
        let candidates = ["I-5", "I-9", "I-1", "I-7"]
            .into_iter()
            .map(|id| CandidateRef::new(id, "u"))
            .collect();
        let ordered = order_candidates(candidates, RecencyKey::NumericSuffix, 2);
        assert_eq!(ids(&ordered), vec!["I-7", "I-9"]);
    }

    #[test]
    fn test_order_candidates_page_position() {
        let candidates = ["newest", "middle", "oldest"]
            .into_iter()
            .map(|id| CandidateRef::new(id, "u"))
            .collect();
        let ordered = order_candidates(candidates, RecencyKey::PagePosition, 5);
        assert_eq!(ids(&ordered), vec!["oldest", "middle", "newest"]);
    }

    #[test]
    fn test_build_record_merges_and_normalizes() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let candidate = CandidateRef::new("N01", "https://example.org/N01").with_hints(ListingHints {
            title: Some("Listing title".to_string()),
            published: Some("2 days ago".to_string()),
            duration: Some("5:30".to_string()),
        });
        let raw = RawDetail {
            source_id: Some("I-265000".to_string()),
            title: Some("  ".to_string()),
            published: Some("not a date".to_string()),
            personalities: vec!["Roberta Metsola".to_string(), "".to_string()],
            ..RawDetail::default()
        };

        let record = build_record("EU Parliament", DateFormat::DayMonthYear, &candidate, raw, now);
        assert_eq!(record.source_id, "I-265000");
        assert_eq!(record.title, "Listing title");
        assert_eq!(record.published_date, "08/03/2025");
        assert_eq!(record.duration, "00:05:30");
        assert_eq!(record.personalities, "Roberta Metsola");
        assert_eq!(record.download_url, NO_DOWNLOAD);
        assert_eq!(record.description, "");
        assert_eq!(record.analysis_id, None);
    }

    #[test]
    fn test_build_record_sentinels() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let candidate = CandidateRef::new("X", "u");
        let record = build_record(
            "NATO Multimedia",
            DateFormat::LongForm,
            &candidate,
            RawDetail::default(),
            now,
        );
        assert_eq!(record.source_id, "X");
        assert_eq!(record.title, UNTITLED_VIDEO);
        assert_eq!(record.published_date, UNKNOWN_DATE);
        assert_eq!(record.duration, ZERO_DURATION);
        assert_eq!(record.download_url, NO_DOWNLOAD);
    }

    #[tokio::test]
    async fn test_known_candidates_are_not_fetched() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.insert_if_absent(&record("A", "stored")).await.unwrap();

        let adapter = FakeAdapter {
            candidates: vec![CandidateRef::new("B", "u/B"), CandidateRef::new("A", "u/A")],
            details: HashMap::from([("B".to_string(), Some(detail("b", "1:30", "07/03/2025")))]),
            ..FakeAdapter::default()
        };

        let summary = fast_pipeline().run(&adapter, &store).await.unwrap();
        assert_eq!(adapter.fetched(), vec!["B".to_string()]);
        assert_eq!(summary.already_known, 1);
        assert_eq!(summary.inserted, 1);

        let stored = store.get("B").await.unwrap().unwrap();
        assert_eq!(stored.download_url, "https://example.org/files/b.mp4");
        assert_eq!(stored.published_date, "07/03/2025");
    }

    #[tokio::test]
    async fn test_missing_detail_skips_without_writes() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let adapter = FakeAdapter {
            candidates: vec![CandidateRef::new("B", "u/B"), CandidateRef::new("C", "u/C")],
            details: HashMap::from([
                ("B".to_string(), Some(detail("b", "1:30", "07/03/2025"))),
                ("C".to_string(), None),
            ]),
            ..FakeAdapter::default()
        };

        let summary = fast_pipeline().run(&adapter, &store).await.unwrap();
        assert_eq!(summary.no_detail, 1);
        assert_eq!(summary.inserted, 1);
        assert!(store.get("C").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_detail_does_not_abort_batch() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let adapter = FakeAdapter {
            candidates: vec![
                CandidateRef::new("B", "u/B"),
                CandidateRef::new("broken", "u/broken"),
                CandidateRef::new("", "u/empty"),
            ],
            details: HashMap::from([("B".to_string(), Some(detail("b", "1:30", "07/03/2025")))]),
            ..FakeAdapter::default()
        };

        let summary = fast_pipeline().run(&adapter, &store).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped_empty, 1);
        assert_eq!(summary.inserted, 1);
        // Two attempts for the broken candidate, one for B.
        assert_eq!(adapter.fetched().len(), 3);
    }

    #[tokio::test]
    async fn test_listing_failure_ends_run_quietly() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let adapter = FakeAdapter {
            list_fails: true,
            ..FakeAdapter::default()
        };

        let summary = fast_pipeline().run(&adapter, &store).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(adapter.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_authentication_failure_is_fatal() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let adapter = FakeAdapter {
            auth_rejected: true,
            candidates: vec![CandidateRef::new("B", "u/B")],
            ..FakeAdapter::default()
        };

        let err = fast_pipeline().run(&adapter, &store).await.unwrap_err();
        let PipelineError::Authentication { source_name, cause } = err;
        assert_eq!(source_name, "EU Commission");
        assert!(!cause.is_exhausted());
        assert_eq!(adapter.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_keeps_link() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let adapter = FakeAdapter {
            resolve_fails: true,
            candidates: vec![CandidateRef::new("B", "u/B")],
            details: HashMap::from([("B".to_string(), Some(detail("b", "1:30", "07/03/2025")))]),
            ..FakeAdapter::default()
        };

        fast_pipeline().run(&adapter, &store).await.unwrap();
        let stored = store.get("B").await.unwrap().unwrap();
        assert_eq!(stored.download_url, "https://example.org/redirect/b.mp4");
    }

    #[tokio::test]
    async fn test_late_resolved_id_is_checked_again() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.insert_if_absent(&record("1062345678", "stored")).await.unwrap();

        let mut raw = detail("coe", "00:10:00", "07/03/2025");
        raw.source_id = Some("1062345678".to_string());
        let adapter = FakeAdapter {
            candidates: vec![CandidateRef::new("human-rights-day", "u/hrd")],
            details: HashMap::from([("human-rights-day".to_string(), Some(raw))]),
            ..FakeAdapter::default()
        };

        let summary = fast_pipeline().run(&adapter, &store).await.unwrap();
        assert_eq!(summary.already_known, 1);
        assert_eq!(summary.inserted, 0);
        assert_eq!(store.get("1062345678").await.unwrap().unwrap().title, "stored");
    }

    #[tokio::test]
    async fn test_limit_applies_before_processing() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let adapter = FakeAdapter {
            candidates: vec![
                CandidateRef::new("n3", "u"),
                CandidateRef::new("n2", "u"),
                CandidateRef::new("n1", "u"),
            ],
            details: HashMap::from([
                ("n3".to_string(), Some(detail("3", "1:00", "03/03/2025"))),
                ("n2".to_string(), Some(detail("2", "1:00", "02/03/2025"))),
                ("n1".to_string(), Some(detail("1", "1:00", "01/03/2025"))),
            ]),
            ..FakeAdapter::default()
        };

        let pipeline = IngestionPipeline::new(RetryPolicy::new(1, Duration::ZERO), 2)
            .with_pause(Duration::ZERO, Duration::ZERO);
        let summary = pipeline.run(&adapter, &store).await.unwrap();
        assert_eq!(summary.listed, 3);
        assert_eq!(adapter.fetched(), vec!["n2".to_string(), "n3".to_string()]);
    }

    #[test]
    fn test_relative_hint_resolves_to_yesterday() {
        let now = Utc::now();
        let candidate = CandidateRef::new("B", "u").with_hints(ListingHints {
            published: Some("1 day ago".to_string()),
            ..ListingHints::default()
        });
        let record = build_record("Greenpeace", DateFormat::Iso8601, &candidate, RawDetail::default(), now);
        let yesterday = (now - TimeDelta::days(1)).format("%d/%m/%Y").to_string();
        assert_eq!(record.published_date, yesterday);
    }

    /// Never reports a record as known, like a run racing another one.
    struct RacingStore(SqliteRecordStore);

    impl RecordStore for RacingStore {
        async fn exists(&self, _source_id: &str) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn insert_if_absent(&self, record: &VideoRecord) -> Result<bool, StoreError> {
            self.0.insert_if_absent(record).await
        }

        async fn list_without_analysis_id(
            &self,
            limit: usize,
        ) -> Result<Vec<PendingRecord>, StoreError> {
            self.0.list_without_analysis_id(limit).await
        }

        async fn set_analysis_id(&self, source_id: &str, job_id: &str) -> Result<(), StoreError> {
            self.0.set_analysis_id(source_id, job_id).await
        }

        async fn get(&self, source_id: &str) -> Result<Option<VideoRecord>, StoreError> {
            self.0.get(source_id).await
        }
    }

    fn single_candidate(title: &str) -> FakeAdapter {
        FakeAdapter {
            candidates: vec![CandidateRef::new("B", "u/B")],
            details: HashMap::from([("B".to_string(), Some(detail(title, "1:30", "07/03/2025")))]),
            ..FakeAdapter::default()
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_store_one_row() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let first = single_candidate("first");
        let second = single_candidate("second");
        let pipeline = fast_pipeline();

        let (s1, s2) = tokio::join!(pipeline.run(&first, &store), pipeline.run(&second, &store));
        let (s1, s2) = (s1.unwrap(), s2.unwrap());

        assert_eq!(s1.inserted + s2.inserted, 1);
        assert_eq!(s1.already_known + s2.already_known, 1);
        assert_eq!(store.list_without_analysis_id(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_conflict_counts_as_known() {
        let store = RacingStore(SqliteRecordStore::open_in_memory().unwrap());
        let first = single_candidate("first");
        let second = single_candidate("second");

        let s1 = fast_pipeline().run(&first, &store).await.unwrap();
        let s2 = fast_pipeline().run(&second, &store).await.unwrap();

        assert_eq!(s1.inserted, 1);
        assert_eq!(s2.inserted, 0);
        assert_eq!(s2.already_known, 1);
        assert_eq!(s2.failed, 0);
        // The second run got past both existence checks and hit the unique index.
        assert_eq!(second.fetched(), vec!["B".to_string()]);
        assert_eq!(store.get("B").await.unwrap().unwrap().title, "first");
    }
}
