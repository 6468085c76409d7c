//! Source adapters for the institutional video portals we ingest from.
//!
//! Each adapter knows one site: where its listing lives, which descriptors
//! pull fields out of it, and how its ids are ordered. All network and DOM
//! work is delegated to the [`PageDriver`](crate::driver::PageDriver) the adapter
//! owns, and adapters never retry on their own; the pipeline wraps every call
//! in its retry policy.
//!
//! # Supported Sources
//!
//! | Source | Module | Listing order | Notes |
//! |--------|--------|---------------|-------|
//! | EU Commission | [`eu_commission`] | numeric id suffix | download links resolved through redirects |
//! | EU Parliament | [`eu_parliament`] | id, descending | duration only on the listing |
//! | Greenpeace | [`youtube`] | page position | YouTube channel |
//! | European Central Bank | [`youtube`] | page position | YouTube channel |
//! | Council of Europe | [`council_of_europe`] | page position | Vimeo player config |
//! | NATO Multimedia | [`nato`] | page position | requires login |
//!
//! # Contract
//!
//! - `list_recent` returns candidates; the pipeline orders them with the
//!   adapter's [`RecencyKey`]
//! - `fetch_detail` returns `Ok(None)` when a structural element is missing
//!   (for example no embedded player). That skips the record without counting
//!   as a failure.
//! - `authenticate` runs before anything else; its failure ends the run

pub mod council_of_europe;
pub mod eu_commission;
pub mod eu_parliament;
pub mod nato;
pub mod youtube;

use clap::ValueEnum;
use std::cmp::Reverse;
use std::time::Duration;

use crate::error::ScrapeError;
use crate::models::{CandidateRef, RawDetail};
use crate::normalize::DateFormat;

/// How an adapter's candidates are ordered from newest to oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyKey {
    /// Higher trailing number in the id is newer (`I-123456`).
    NumericSuffix,
    /// Lexicographically greater id is newer.
    Lexicographic,
    /// The listing page already shows newest first.
    PagePosition,
}

impl RecencyKey {
    /// Sort `candidates` newest first. Stable, so ties keep page order.
    pub fn sort_newest_first(self, candidates: &mut [CandidateRef]) {
        match self {
            RecencyKey::NumericSuffix => {
                candidates.sort_by_key(|c| Reverse(numeric_suffix(&c.source_id)));
            }
            RecencyKey::Lexicographic => {
                candidates.sort_by(|a, b| b.source_id.cmp(&a.source_id));
            }
            RecencyKey::PagePosition => {}
        }
    }
}

/// Trailing run of digits in `id`, if any.
pub fn numeric_suffix(id: &str) -> Option<u64> {
    let digits: String = id
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// One source of videos.
pub trait SourceAdapter {
    /// Human-readable provider name stored with each record.
    fn name(&self) -> &str;

    /// How listing candidates are ordered.
    fn recency_key(&self) -> RecencyKey;

    /// How the source writes publication dates.
    fn date_format(&self) -> DateFormat;

    /// Establish a session before listing. Sources without a login succeed.
    async fn authenticate(&self) -> Result<(), ScrapeError> {
        Ok(())
    }

    /// Recent candidates; at least `limit` when the page shows that many.
    async fn list_recent(&self, limit: usize) -> Result<Vec<CandidateRef>, ScrapeError>;

    /// Raw fields of one candidate, or `None` when the page lacks what makes
    /// it a usable record.
    async fn fetch_detail(&self, candidate: &CandidateRef)
    -> Result<Option<RawDetail>, ScrapeError>;

    /// Optional post-processing of an extracted download link.
    async fn resolve_download_url(&self, url: &str) -> Result<String, ScrapeError> {
        Ok(url.to_string())
    }
}

/// The fixed roster of sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SourceName {
    EuCommission,
    EuParliament,
    Greenpeace,
    Ecb,
    CouncilOfEurope,
    Nato,
}

impl SourceName {
    pub fn all() -> Vec<SourceName> {
        SourceName::value_variants().to_vec()
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => write!(f, "{self:?}"),
        }
    }
}

/// Timeouts shared by all adapters.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub navigation: Duration,
    pub element: Duration,
}

impl Timeouts {
    pub fn new(navigation: Duration) -> Self {
        Self {
            navigation,
            element: navigation / 3,
        }
    }
}

/// Strip a leading label such as `Date:` from an extracted value.
pub(crate) fn strip_label(value: Option<String>, label: &str) -> Option<String> {
    value.map(|v| match v.find(label) {
        Some(i) => v[i + label.len()..].trim().to_string(),
        None => v.trim().to_string(),
    })
}

/// Last `/`-separated path segment of a URL, ignoring query and fragment.
pub(crate) fn last_path_segment(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}
