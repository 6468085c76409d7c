//! YouTube channel adapter, used for Greenpeace and the European Central Bank.
//!
//! The channel's `/videos` grid lists newest first and shows relative dates
//! ("3 days ago"). The watch page adds an exact ISO date, the description and
//! the duration. The stored download URL is the watch URL itself.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument};
use url::Url;

use super::{RecencyKey, SourceAdapter, Timeouts};
use crate::driver::{PageDriver, ReadySignal, WaitOptions};
use crate::error::ScrapeError;
use crate::models::{CandidateRef, ListingHints, RawDetail};
use crate::normalize::{DateFormat, duration_from_seconds};

pub const GREENPEACE_CHANNEL: &str = "https://www.youtube.com/@greenpeace/videos";
pub const ECB_CHANNEL: &str = "https://www.youtube.com/@ecbeuro/videos";

const COOKIE_ACCEPT: &str = r#"button:has-text("Accept")"#;

const GRID_ITEM: &str = "ytd-rich-grid-media";
const ITEM_TITLE: &str = "yt-formatted-string#video-title";
const ITEM_LINK: &str = "a#thumbnail @href";
const ITEM_DURATION: &str = "span.ytd-thumbnail-overlay-time-status-renderer";
const ITEM_AGE: &str = "#metadata-line span.inline-metadata-item:nth-child(2)";

const WATCH_TITLE: &str = "h1.ytd-watch-metadata";
const WATCH_PUBLISHED: &str = r#"meta[itemprop="datePublished"] @content"#;
const WATCH_UPLOADED: &str = r#"meta[itemprop="uploadDate"] @content"#;
const WATCH_DESCRIPTION: &str = "yt-formatted-string#description";
const WATCH_DURATION: &str = "span.ytp-time-duration";
const WATCH_DURATION_META: &str = r#"meta[itemprop="duration"] @content"#;

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").expect("static regex")
});

/// One YouTube channel.
pub struct YouTubeChannel<D> {
    driver: D,
    timeouts: Timeouts,
    provider: &'static str,
    channel_url: &'static str,
}

/// The `v` query parameter of a watch URL.
pub(crate) fn video_id(watch_url: &str) -> Option<String> {
    let url = Url::parse(watch_url).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "v")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// `PT1H2M3S` → `01:02:03`.
pub(crate) fn iso_duration(raw: &str) -> Option<String> {
    let caps = ISO_DURATION.captures(raw.trim())?;
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    if caps.get(1).is_none() && caps.get(2).is_none() && caps.get(3).is_none() {
        return None;
    }
    Some(duration_from_seconds(part(1) * 3600 + part(2) * 60 + part(3)))
}

impl<D: PageDriver> YouTubeChannel<D> {
    pub fn new(
        driver: D,
        timeouts: Timeouts,
        provider: &'static str,
        channel_url: &'static str,
    ) -> Self {
        Self {
            driver,
            timeouts,
            provider,
            channel_url,
        }
    }

    pub fn greenpeace(driver: D, timeouts: Timeouts) -> Self {
        Self::new(driver, timeouts, "Greenpeace", GREENPEACE_CHANNEL)
    }

    pub fn ecb(driver: D, timeouts: Timeouts) -> Self {
        Self::new(driver, timeouts, "European Central Bank", ECB_CHANNEL)
    }

    /// Dismiss the consent banner if one is shown.
    async fn accept_cookies(&self) {
        let shown = self
            .driver
            .wait_for(COOKIE_ACCEPT, WaitOptions::visible(self.timeouts.element))
            .await;
        if shown.is_err() {
            debug!("No cookies prompt found");
            return;
        }
        match self.driver.click(COOKIE_ACCEPT).await {
            Ok(()) => info!("Accepted cookies"),
            Err(e) => debug!(error = %e, "Cookie prompt not accepted"),
        }
    }

    async fn read_listing(&self) -> Result<Vec<CandidateRef>, ScrapeError> {
        let rows = self
            .driver
            .extract_rows(GRID_ITEM, &[ITEM_TITLE, ITEM_LINK, ITEM_DURATION, ITEM_AGE])
            .await?;

        Ok(rows
            .into_iter()
            .map(|mut row| {
                let link = row[1].take().unwrap_or_default();
                let hints = ListingHints {
                    title: row[0].take(),
                    duration: row[2].take(),
                    published: row[3].take(),
                };
                CandidateRef::new(video_id(&link).unwrap_or_default(), link).with_hints(hints)
            })
            .collect())
    }

    async fn read_detail(&self) -> Result<RawDetail, ScrapeError> {
        let d = &self.driver;

        let published = match d.extract(WATCH_PUBLISHED).await? {
            Some(date) => Some(date),
            None => d.extract(WATCH_UPLOADED).await?,
        };
        let duration = match d.extract(WATCH_DURATION).await? {
            Some(clock) => Some(clock),
            None => d
                .extract(WATCH_DURATION_META)
                .await?
                .and_then(|raw| iso_duration(&raw)),
        };

        Ok(RawDetail {
            source_id: None,
            title: d.extract(WATCH_TITLE).await?,
            published,
            description: d.extract(WATCH_DESCRIPTION).await?,
            personalities: Vec::new(),
            duration,
            download_url: None,
        })
    }
}

impl<D: PageDriver> SourceAdapter for YouTubeChannel<D> {
    fn name(&self) -> &str {
        self.provider
    }

    fn recency_key(&self) -> RecencyKey {
        RecencyKey::PagePosition
    }

    fn date_format(&self) -> DateFormat {
        DateFormat::Iso8601
    }

    #[instrument(level = "info", skip(self), fields(source = self.provider))]
    async fn list_recent(&self, limit: usize) -> Result<Vec<CandidateRef>, ScrapeError> {
        self.driver
            .navigate(
                self.channel_url,
                ReadySignal::NetworkIdle,
                self.timeouts.navigation,
            )
            .await?;
        self.accept_cookies().await;
        self.driver
            .wait_for(ITEM_TITLE, WaitOptions::visible(self.timeouts.navigation))
            .await?;

        let candidates = self.read_listing().await?;
        info!(count = candidates.len(), limit, "Indexed channel videos");
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

        let mut detail = self.read_detail().await?;
        detail.download_url = Some(candidate.detail_url.clone());
        Ok(Some(detail))
    }
}
