//! European Parliament multimedia centre.
//!
//! Listing cards link to pages like `/en/video/plenary-session_N01-PUB-250307-SESS`;
//! the part after the last `_` is a provisional id. Detail pages carry a
//! `Reference:` label with the canonical id, which replaces it when present.
//!
//! Duration only appears on the listing card, so it travels to the record as
//! a listing hint. Personalities are tagged as `SURNAME, Given (Group)` and are
//! stored as `Given Surname`.

use tracing::{debug, info, instrument, warn};

use super::{RecencyKey, SourceAdapter, Timeouts, strip_label};
use crate::driver::{PageDriver, ReadySignal, WaitOptions};
use crate::error::ScrapeError;
use crate::models::{CandidateRef, ListingHints, RawDetail};
use crate::normalize::DateFormat;
use crate::utils::title_case;

pub const PROVIDER: &str = "EU Parliament";

const SEARCH_URL: &str = "https://multimedia.europarl.europa.eu/en/search?tab=videos&category=27&page=1";

const VIDEO_ITEM: &str = "div.media-item-card_mediaItemCard__rrO3C";
const ITEM_LINK: &str = "a @href";
const ITEM_DURATION: &str = "div.media-item-card_mediaItemCard__info__qWdCB p";

const TITLE: &str = "h1.content-title_heading__Umnug div";
const DESCRIPTION: &str =
    "div.content-summary_html_raw_content__5bz2F.content-summary_not_compact___yCfw";
const PERSONALITY_TAG: &str = "a.tag_tag__ZWglu";
const PUBLISHED_DATE: &str = r#"span:has-text("Event date:")"#;
const REFERENCE: &str = r#"span:has-text("Reference:")"#;
const DOWNLOAD_TAB: &str = r#"a:has-text("Download")"#;
const DOWNLOAD_LINK: &str = "div.downloads-tab-content_downloadlist__button__vPzY_ a";

pub struct EuParliament<D> {
    driver: D,
    timeouts: Timeouts,
}

/// Provisional id: whatever follows the last `_` of the detail URL.
fn provisional_id(href: &str) -> String {
    match href.rsplit_once('_') {
        Some((_, id)) => id.trim_end_matches('/').to_string(),
        None => String::new(),
    }
}

/// `"METSOLA, Roberta (EPP)"` → `"Roberta Metsola"`. Anything without a comma
/// is kept as written, minus the group.
pub(crate) fn reformat_person(raw: &str) -> String {
    let without_group = match (raw.find('('), raw.find(')')) {
        (Some(open), Some(close)) if open < close => {
            format!("{}{}", &raw[..open], &raw[close + 1..])
        }
        _ => raw.to_string(),
    };
    let text = without_group.trim();

    match text.split_once(',') {
        Some((surname, given)) => {
            format!("{} {}", title_case(given.trim()), title_case(surname.trim()))
                .trim()
                .to_string()
        }
        None => text.to_string(),
    }
}

/// Make `//host/path` links absolute.
fn absolutize(url: String) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url
    }
}

impl<D: PageDriver> EuParliament<D> {
    pub fn new(driver: D, timeouts: Timeouts) -> Self {
        Self { driver, timeouts }
    }

    async fn read_listing(&self) -> Result<Vec<CandidateRef>, ScrapeError> {
        let rows = self
            .driver
            .extract_rows(VIDEO_ITEM, &[ITEM_LINK, ITEM_DURATION])
            .await?;

        Ok(rows
            .into_iter()
            .map(|mut row| {
                let href = row[0].take().unwrap_or_default();
                let hints = ListingHints {
                    duration: row[1].take(),
                    ..ListingHints::default()
                };
                CandidateRef::new(provisional_id(&href), href).with_hints(hints)
            })
            .collect())
    }

    /// Fields readable before the download tab is opened.
    async fn read_detail(&self, candidate: &CandidateRef) -> Result<RawDetail, ScrapeError> {
        let d = &self.driver;

        let tags = d.extract_rows(PERSONALITY_TAG, &["@href", ""]).await?;
        let personalities = tags
            .into_iter()
            .filter(|row| row[0].as_deref().is_some_and(|href| href.contains("/person/")))
            .filter_map(|mut row| row[1].take())
            .map(|name| reformat_person(&name))
            .collect();

        let reference = strip_label(d.extract(REFERENCE).await?, "Reference:");
        if reference.is_none() {
            warn!(url = %candidate.detail_url, "Reference not found; keeping provisional id");
        }

        Ok(RawDetail {
            source_id: reference,
            title: d.extract(TITLE).await?,
            published: strip_label(d.extract(PUBLISHED_DATE).await?, "Event date:"),
            description: d.extract(DESCRIPTION).await?,
            personalities,
            duration: None,
            download_url: None,
        })
    }

    /// Open the download tab and read the first link. Best-effort.
    async fn read_download_link(&self) -> Option<String> {
        if let Err(e) = self.driver.click(DOWNLOAD_TAB).await {
            debug!(error = %e, "Download tab not clickable");
        }
        if let Err(e) = self
            .driver
            .wait_for(DOWNLOAD_LINK, WaitOptions::visible(self.timeouts.element))
            .await
        {
            debug!(error = %e, "Download list did not appear");
        }
        match self.driver.extract(&format!("{DOWNLOAD_LINK} @href")).await {
            Ok(link) => link.map(absolutize),
            Err(e) => {
                debug!(error = %e, "Download link unreadable");
                None
            }
        }
    }
}

impl<D: PageDriver> SourceAdapter for EuParliament<D> {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn recency_key(&self) -> RecencyKey {
        RecencyKey::Lexicographic
    }

    fn date_format(&self) -> DateFormat {
        DateFormat::DayMonthYear
    }

    #[instrument(level = "info", skip(self), fields(source = PROVIDER))]
    async fn list_recent(&self, limit: usize) -> Result<Vec<CandidateRef>, ScrapeError> {
        self.driver
            .navigate(
                SEARCH_URL,
                ReadySignal::DomContentLoaded,
                self.timeouts.navigation,
            )
            .await?;
        self.driver
            .wait_for(VIDEO_ITEM, WaitOptions::visible(self.timeouts.navigation))
            .await?;

        let candidates = self.read_listing().await?;
        info!(count = candidates.len(), limit, "Indexed EU Parliament videos");
        Ok(candidates)
    }

    async fn fetch_detail(
        &self,
        candidate: &CandidateRef,
    ) -> Result<Option<RawDetail>, ScrapeError> {
        self.driver
            .navigate(
                &candidate.detail_url,
                ReadySignal::DomContentLoaded,
                self.timeouts.navigation,
            )
            .await?;
        if let Err(e) = self
            .driver
            .wait_for(TITLE, WaitOptions::visible(self.timeouts.navigation))
            .await
        {
            debug!(error = %e, "Title not visible yet; reading what is there");
        }

        let mut detail = self.read_detail(candidate).await?;
        detail.download_url = self.read_download_link().await;
        Ok(Some(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::HttpPageDriver;
    use std::time::Duration;

    const LISTING: &str = r#"
        <div class="media-item-card_mediaItemCard__rrO3C">
          <a href="/en/video/plenary-session_N01-PUB-250307-SESS">Plenary</a>
          <div class="media-item-card_mediaItemCard__info__qWdCB"><p>1:02:03</p></div>
        </div>
        <div class="media-item-card_mediaItemCard__rrO3C">
          <a href="/en/video/press-point">Press</a>
        </div>
    "#;

    const DETAIL: &str = r#"
        <h1 class="content-title_heading__Umnug"><div>Plenary session</div></h1>
        <span>Event date: 07/03/2025</span>
        <span>Reference: I-265000</span>
        <div class="content-summary_html_raw_content__5bz2F content-summary_not_compact___yCfw">Votes.</div>
        <a class="tag_tag__ZWglu" href="/en/person/METSOLA">METSOLA, Roberta (EPP)</a>
        <a class="tag_tag__ZWglu" href="/en/topic/budget">Budget</a>
        <div class="downloads-tab-content_downloadlist__button__vPzY_">
          <a href="//cdn.europarl.europa.eu/I-265000.mp4">MP4</a>
        </div>
    "#;

    fn adapter(url: &str, html: &str) -> EuParliament<HttpPageDriver> {
        let driver = HttpPageDriver::new(Duration::from_secs(5)).unwrap();
        driver.load_html(url, html);
        EuParliament::new(driver, Timeouts::new(Duration::from_secs(5)))
    }

    #[test]
    fn test_provisional_id() {
        assert_eq!(
            provisional_id("https://multimedia.europarl.europa.eu/en/video/x_N01-PUB"),
            "N01-PUB"
        );
        assert_eq!(provisional_id("https://multimedia.europarl.europa.eu/en/video/x"), "");
    }

    #[test]
    fn test_reformat_person() {
        assert_eq!(reformat_person("METSOLA, Roberta (EPP)"), "Roberta Metsola");
        assert_eq!(reformat_person("VON DER LEYEN, Ursula"), "Ursula Von Der Leyen");
        assert_eq!(reformat_person("Kaja Kallas"), "Kaja Kallas");
        assert_eq!(reformat_person("Someone (S&D)"), "Someone");
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(absolutize("//cdn.example.org/a.mp4".into()), "https://cdn.example.org/a.mp4");
        assert_eq!(absolutize("https://a/b".into()), "https://a/b");
    }

    #[tokio::test]
    async fn test_read_listing_keeps_empty_ids() {
        let a = adapter("https://multimedia.europarl.europa.eu/en/search", LISTING);
        let candidates = a.read_listing().await.unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].source_id, "N01-PUB-250307-SESS");
        assert_eq!(candidates[0].hints.duration.as_deref(), Some("1:02:03"));
        assert_eq!(candidates[1].source_id, "");
    }

    #[tokio::test]
    async fn test_read_detail_prefers_reference() {
        let url = "https://multimedia.europarl.europa.eu/en/video/plenary-session_N01-PUB-250307-SESS";
        let a = adapter(url, DETAIL);
        let detail = a.read_detail(&CandidateRef::new("N01-PUB-250307-SESS", url)).await.unwrap();

        assert_eq!(detail.source_id.as_deref(), Some("I-265000"));
        assert_eq!(detail.title.as_deref(), Some("Plenary session"));
        assert_eq!(detail.published.as_deref(), Some("07/03/2025"));
        assert_eq!(detail.description.as_deref(), Some("Votes."));
        assert_eq!(detail.personalities, vec!["Roberta Metsola".to_string()]);

        assert_eq!(
            a.read_download_link().await.as_deref(),
            Some("https://cdn.europarl.europa.eu/I-265000.mp4")
        );
    }
}
