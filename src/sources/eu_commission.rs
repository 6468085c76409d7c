//! EU Commission audiovisual service.
//!
//! Scrapes the [Audiovisual Service](https://audiovisual.ec.europa.eu) video
//! news search. Ids look like `I-264530`; the numeric suffix grows with
//! publication, so the listing is re-sorted on it rather than trusted.
//!
//! # Detail Page
//!
//! Date and duration sit in labelled paragraphs (`Date: 07/03/2025`) inside
//! `div.avs-media-details`. The download link often points at a redirecting
//! endpoint, which [`SourceAdapter::resolve_download_url`] follows.

use tracing::{debug, info, instrument};

use super::{RecencyKey, SourceAdapter, Timeouts, last_path_segment, strip_label};
use crate::driver::{PageDriver, ReadySignal, WaitOptions};
use crate::error::ScrapeError;
use crate::models::{CandidateRef, ListingHints, RawDetail};
use crate::normalize::DateFormat;

pub const PROVIDER: &str = "EU Commission";

const LISTING_URL: &str = "https://audiovisual.ec.europa.eu/en/search?mediatype=VIDEO&categories=VideoNews&sort=score&direction=desc";

const SEARCH_RESULT: &str = "section.avs-file";
const RESULT_LINK: &str = "a.ecl-link @href";
const RESULT_TITLE: &str = "span.description";
const RESULT_DATE: &str = "span.meta";
const RESULT_DURATION: &str = ".avs-video-duration";

const DETAIL_TITLE: &str = "h1.details-main-title";
const DETAIL_DATE: &str = r#"div.avs-media-details p:has-text("Date:")"#;
const DETAIL_DURATION: &str = r#"div.avs-media-details p:has-text("Duration:")"#;
const DETAIL_DESCRIPTION: &str = "p[ng-bind-html*='video.summary']";
const DETAIL_PERSONALITIES: &str = "p[ng-if*='video.personalities'] a.ecl-link";
const DETAIL_DOWNLOAD_LINK: &str = "#downloadlink @href";

pub struct EuCommission<D> {
    driver: D,
    timeouts: Timeouts,
}

impl<D: PageDriver> EuCommission<D> {
    pub fn new(driver: D, timeouts: Timeouts) -> Self {
        Self { driver, timeouts }
    }

    async fn read_listing(&self) -> Result<Vec<CandidateRef>, ScrapeError> {
        let rows = self
            .driver
            .extract_rows(
                SEARCH_RESULT,
                &[RESULT_LINK, RESULT_TITLE, RESULT_DATE, RESULT_DURATION],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let href = row[0].take()?;
                let hints = ListingHints {
                    title: row[1].take(),
                    published: row[2].take(),
                    duration: row[3].take(),
                };
                Some(CandidateRef::new(last_path_segment(&href), href).with_hints(hints))
            })
            .collect())
    }

    async fn read_detail(&self) -> Result<RawDetail, ScrapeError> {
        let d = &self.driver;
        Ok(RawDetail {
            source_id: None,
            title: d.extract(DETAIL_TITLE).await?,
            published: strip_label(d.extract(DETAIL_DATE).await?, "Date:"),
            description: d.extract(DETAIL_DESCRIPTION).await?,
            personalities: d.extract_all(DETAIL_PERSONALITIES).await?,
            duration: strip_label(d.extract(DETAIL_DURATION).await?, "Duration:"),
            download_url: d.extract(DETAIL_DOWNLOAD_LINK).await?,
        })
    }
}

impl<D: PageDriver> SourceAdapter for EuCommission<D> {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn recency_key(&self) -> RecencyKey {
        RecencyKey::NumericSuffix
    }

    fn date_format(&self) -> DateFormat {
        DateFormat::DayMonthYear
    }

    #[instrument(level = "info", skip(self), fields(source = PROVIDER))]
    async fn list_recent(&self, limit: usize) -> Result<Vec<CandidateRef>, ScrapeError> {
        self.driver
            .navigate(LISTING_URL, ReadySignal::NetworkIdle, self.timeouts.navigation)
            .await?;
        self.driver
            .wait_for(SEARCH_RESULT, WaitOptions::visible(self.timeouts.element))
            .await?;

        let candidates = self.read_listing().await?;
        info!(count = candidates.len(), limit, "Indexed EU Commission videos");
        Ok(candidates)
    }

    async fn fetch_detail(
        &self,
        candidate: &CandidateRef,
    ) -> Result<Option<RawDetail>, ScrapeError> {
        self.driver
            .navigate(
                &candidate.detail_url,
                ReadySignal::NetworkIdle,
                self.timeouts.navigation,
            )
            .await?;
        self.driver
            .wait_for(DETAIL_TITLE, WaitOptions::visible(self.timeouts.element))
            .await?;
        self.read_detail().await.map(Some)
    }

    async fn resolve_download_url(&self, url: &str) -> Result<String, ScrapeError> {
        let resolved = self.driver.resolve_url(url).await?;
        if resolved != url {
            debug!(from = url, to = %resolved, "Download link redirected");
        }
        Ok(resolved)
    }
}
