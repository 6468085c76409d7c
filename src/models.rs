//! Data models for ingested videos and the intermediate shapes produced by
//! source adapters.
//!
//! This module defines the core data structures used throughout the application:
//! - [`VideoRecord`]: The canonical, normalized row persisted per video
//! - [`CandidateRef`]: A listing entry discovered on a source, not yet fetched
//! - [`RawDetail`]: Source-specific field values scraped from a detail page
//! - [`PendingRecord`]: The projection of a stored video awaiting analysis

use itertools::Itertools;

/// Placeholder stored when no publication date could be normalized.
pub const UNKNOWN_DATE: &str = "Unknown Date";
/// Placeholder stored when no title could be extracted.
pub const UNTITLED_VIDEO: &str = "Untitled Video";
/// Placeholder stored when no duration could be normalized.
pub const ZERO_DURATION: &str = "00:00:00";
/// Placeholder stored when no download link could be extracted.
pub const NO_DOWNLOAD: &str = "No download available";

/// A normalized video as persisted in the record store.
///
/// Every field except `analysis_id` is written once at ingestion. Sentinel
/// values (see the constants in this module) are valid terminal states and
/// never prevent a record from being stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    /// Identifier assigned by the originating source. Unique across the store.
    pub source_id: String,
    /// Human-readable source name, e.g. "EU Commission".
    pub content_provider: String,
    /// `DD/MM/YYYY` or [`UNKNOWN_DATE`].
    pub published_date: String,
    /// Never empty; [`UNTITLED_VIDEO`] when extraction failed.
    pub title: String,
    pub description: String,
    /// Comma-joined person names, possibly empty.
    pub personalities: String,
    /// `HH:MM:SS` or [`ZERO_DURATION`].
    pub duration: String,
    /// Absolute URL or [`NO_DOWNLOAD`].
    pub download_url: String,
    /// Job identifier returned by the analysis service; `None` until submitted.
    pub analysis_id: Option<String>,
}

/// Fields some sources expose on their listing page already.
///
/// Adapters fill whatever their listing shows; the pipeline uses these values
/// when the detail page does not carry the same field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingHints {
    pub title: Option<String>,
    pub published: Option<String>,
    pub duration: Option<String>,
}

/// A minimal reference to a video discovered while listing a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRef {
    pub source_id: String,
    pub detail_url: String,
    pub hints: ListingHints,
}

impl CandidateRef {
    pub fn new(source_id: impl Into<String>, detail_url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            detail_url: detail_url.into(),
            hints: ListingHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: ListingHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Raw, not yet normalized values scraped from a detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDetail {
    /// Identifier only resolvable on the detail page (e.g. an embedded player
    /// id). Replaces the candidate's id when present.
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub published: Option<String>,
    pub description: Option<String>,
    pub personalities: Vec<String>,
    pub duration: Option<String>,
    pub download_url: Option<String>,
}

impl RawDetail {
    /// Personalities joined the way they are stored.
    pub fn joined_personalities(&self) -> String {
        self.personalities
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .join(", ")
    }
}

/// A stored video that has not been sent to the analysis service yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub source_id: String,
    pub title: String,
    pub download_url: String,
}

/// Treat empty or whitespace-only strings as missing.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
