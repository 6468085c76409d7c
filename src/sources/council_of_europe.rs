//! Council of Europe video portal.
//!
//! Videos are Vimeo embeds. The stable id is the Vimeo id taken from the
//! player iframe on the detail page, so the listing only yields provisional
//! ids (the page slug). Download URL, upload date and duration come from the
//! Vimeo player config document, captured with
//! [`PageDriver::await_response_matching`].
//!
//! A detail page without a Vimeo iframe is skipped, not failed. Once the id
//! is known the video is kept even if the player config cannot be read; its
//! media fields then fall back to the sentinels.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{RecencyKey, SourceAdapter, Timeouts, last_path_segment};
use crate::driver::{PageDriver, ReadySignal, WaitOptions};
use crate::error::ScrapeError;
use crate::models::{CandidateRef, ListingHints, RawDetail};
use crate::normalize::{DateFormat, duration_from_seconds};
use crate::utils::truncate_for_log;

pub const PROVIDER: &str = "Council of Europe";

const BASE_URL: &str = "https://www.coe.int/en/web/portal/videos";

const VIDEO_ITEM: &str = ".element.itemCat.clearfix";
const ITEM_LINK: &str = "h3 a @href";
const ITEM_TITLE: &str = "h3 a";

const DETAIL_TITLE: &str = ".asset-title.d-inline";
const VIMEO_IFRAME: &str = "iframe @src";

static VIMEO_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"video/(\d+)").expect("static regex"));

#[derive(Debug, Default, Deserialize)]
struct PlayerConfig {
    #[serde(default)]
    request: ConfigRequest,
    #[serde(default)]
    video: ConfigVideo,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigRequest {
    #[serde(default)]
    files: ConfigFiles,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFiles {
    #[serde(default)]
    progressive: Vec<Rendition>,
}

#[derive(Debug, Deserialize)]
struct Rendition {
    url: String,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigVideo {
    upload_date: Option<String>,
    duration: Option<f64>,
}

/// What the player config contributes to a record.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct VimeoMedia {
    pub download_url: Option<String>,
    pub published: Option<String>,
    pub duration: Option<String>,
}

pub(crate) fn vimeo_id(iframe_src: &str) -> Option<String> {
    VIMEO_ID
        .captures(iframe_src)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn config_url(vimeo_id: &str) -> String {
    format!("https://player.vimeo.com/video/{vimeo_id}/config")
}

/// Parse the player config; the tallest progressive rendition wins.
pub(crate) fn parse_player_config(body: &str) -> Result<VimeoMedia, ScrapeError> {
    let config: PlayerConfig = serde_json::from_str(body).map_err(|e| {
        ScrapeError::Payload(format!("player config: {e} in {}", truncate_for_log(body, 200)))
    })?;

    let download_url = config
        .request
        .files
        .progressive
        .into_iter()
        .max_by_key(|r| r.height)
        .map(|r| r.url);

    Ok(VimeoMedia {
        download_url,
        published: config.video.upload_date,
        duration: config
            .video
            .duration
            .filter(|secs| *secs > 0.0)
            .map(|secs| duration_from_seconds(secs.round() as u64)),
    })
}

pub struct CouncilOfEurope<D> {
    driver: D,
    timeouts: Timeouts,
}

impl<D: PageDriver> CouncilOfEurope<D> {
    pub fn new(driver: D, timeouts: Timeouts) -> Self {
        Self { driver, timeouts }
    }

    async fn read_listing(&self) -> Result<Vec<CandidateRef>, ScrapeError> {
        let rows = self
            .driver
            .extract_rows(VIDEO_ITEM, &[ITEM_LINK, ITEM_TITLE])
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let href = row[0].take()?;
                let hints = ListingHints {
                    title: row[1].take(),
                    ..ListingHints::default()
                };
                Some(CandidateRef::new(last_path_segment(&href), href).with_hints(hints))
            })
            .collect())
    }

    /// Vimeo id of the embedded player, if the page has one.
    async fn read_vimeo_id(&self, detail_url: &str) -> Result<Option<String>, ScrapeError> {
        let Some(src) = self.driver.extract(VIMEO_IFRAME).await? else {
            warn!(url = detail_url, "No Vimeo iframe found; skipping");
            return Ok(None);
        };
        let id = vimeo_id(&src);
        if id.is_none() {
            warn!(%src, "Could not extract Vimeo id; skipping");
        }
        Ok(id)
    }

    /// Player config media for `id`. Best-effort: failures yield empty fields.
    async fn read_media(&self, id: &str) -> VimeoMedia {
        let body = match self
            .driver
            .await_response_matching(&config_url(id), self.timeouts.navigation)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(vimeo_id = id, error = %e, "Player config unavailable; keeping video without media fields");
                return VimeoMedia::default();
            }
        };
        parse_player_config(&body).unwrap_or_else(|e| {
            warn!(vimeo_id = id, error = %e, "Failed to parse player config");
            VimeoMedia::default()
        })
    }
}

impl<D: PageDriver> SourceAdapter for CouncilOfEurope<D> {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn recency_key(&self) -> RecencyKey {
        RecencyKey::PagePosition
    }

    fn date_format(&self) -> DateFormat {
        DateFormat::Iso8601
    }

    #[instrument(level = "info", skip(self), fields(source = PROVIDER))]
    async fn list_recent(&self, limit: usize) -> Result<Vec<CandidateRef>, ScrapeError> {
        self.driver
            .navigate(
                BASE_URL,
                ReadySignal::DomContentLoaded,
                self.timeouts.navigation,
            )
            .await?;
        self.driver
            .wait_for(VIDEO_ITEM, WaitOptions::visible(self.timeouts.navigation))
            .await?;

        let candidates = self.read_listing().await?;
        info!(count = candidates.len(), limit, "Indexed Council of Europe videos");
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

        let Some(id) = self.read_vimeo_id(&candidate.detail_url).await? else {
            return Ok(None);
        };
        let title = self.driver.extract(DETAIL_TITLE).await?;
        let media = self.read_media(&id).await;

        Ok(Some(RawDetail {
            source_id: Some(id),
            title,
            published: media.published,
            description: None,
            personalities: Vec::new(),
            duration: media.duration,
            download_url: media.download_url,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::HttpPageDriver;
    use crate::models::{NO_DOWNLOAD, UNKNOWN_DATE, ZERO_DURATION};
    use crate::pipeline::tests::fast_pipeline;
    use crate::store::{RecordStore, SqliteRecordStore};
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Serves fixed field values; the player config answers `config`.
    struct ScriptedDriver {
        fields: HashMap<&'static str, String>,
        rows: Vec<Vec<Option<String>>>,
        config: Result<String, StatusCode>,
    }

    impl ScriptedDriver {
        fn vimeo_page(config: Result<String, StatusCode>) -> Self {
            Self {
                fields: HashMap::from([
                    (VIMEO_IFRAME, "https://player.vimeo.com/video/777?h=x".to_string()),
                    (DETAIL_TITLE, "Committee of Ministers".to_string()),
                ]),
                rows: vec![vec![
                    Some("https://www.coe.int/en/web/portal/-/ministers".to_string()),
                    Some("Ministers".to_string()),
                ]],
                config,
            }
        }
    }

    impl PageDriver for ScriptedDriver {
        async fn navigate(&self, _: &str, _: ReadySignal, _: Duration) -> Result<(), ScrapeError> {
            Ok(())
        }

        async fn extract(&self, descriptor: &str) -> Result<Option<String>, ScrapeError> {
            Ok(self.fields.get(descriptor).cloned())
        }

        async fn extract_all(&self, descriptor: &str) -> Result<Vec<String>, ScrapeError> {
            Ok(self.fields.get(descriptor).cloned().into_iter().collect())
        }

        async fn extract_rows(
            &self,
            _: &str,
            _: &[&str],
        ) -> Result<Vec<Vec<Option<String>>>, ScrapeError> {
            Ok(self.rows.clone())
        }

        async fn click(&self, _: &str) -> Result<(), ScrapeError> {
            Ok(())
        }

        async fn fill(&self, _: &str, _: &str) -> Result<(), ScrapeError> {
            Ok(())
        }

        async fn wait_for(&self, _: &str, _: WaitOptions) -> Result<(), ScrapeError> {
            Ok(())
        }

        async fn await_response_matching(
            &self,
            url_pattern: &str,
            _: Duration,
        ) -> Result<String, ScrapeError> {
            self.config.clone().map_err(|status| ScrapeError::Http {
                status,
                url: url_pattern.to_string(),
            })
        }

        async fn resolve_url(&self, url: &str) -> Result<String, ScrapeError> {
            Ok(url.to_string())
        }
    }

    fn scripted(config: Result<String, StatusCode>) -> CouncilOfEurope<ScriptedDriver> {
        CouncilOfEurope::new(
            ScriptedDriver::vimeo_page(config),
            Timeouts::new(Duration::from_secs(5)),
        )
    }

    const LISTING: &str = r#"
        <div class="element itemCat clearfix">
          <h3><a href="/en/web/portal/-/human-rights-day">Human rights day</a></h3>
        </div>
        <div class="element itemCat clearfix"><h3>No link</h3></div>
    "#;

    const CONFIG: &str = r#"{
        "request": {"files": {"progressive": [
            {"url": "https://vod.example/360.mp4", "height": 360},
            {"url": "https://vod.example/1080.mp4", "height": 1080},
            {"url": "https://vod.example/720.mp4", "height": 720}
        ]}},
        "video": {"upload_date": "2025-03-07 10:15:00", "duration": 754}
    }"#;

    fn adapter(url: &str, html: &str) -> CouncilOfEurope<HttpPageDriver> {
        let driver = HttpPageDriver::new(Duration::from_secs(5)).unwrap();
        driver.load_html(url, html);
        CouncilOfEurope::new(driver, Timeouts::new(Duration::from_secs(5)))
    }

    #[test]
    fn test_vimeo_id() {
        assert_eq!(
            vimeo_id("https://player.vimeo.com/video/1062345678?h=abc").as_deref(),
            Some("1062345678")
        );
        assert_eq!(vimeo_id("https://www.youtube.com/embed/xyz"), None);
        assert_eq!(config_url("42"), "https://player.vimeo.com/video/42/config");
    }

    #[test]
    fn test_parse_player_config_picks_tallest() {
        let media = parse_player_config(CONFIG).unwrap();
        assert_eq!(
            media,
            VimeoMedia {
                download_url: Some("https://vod.example/1080.mp4".to_string()),
                published: Some("2025-03-07 10:15:00".to_string()),
                duration: Some("00:12:34".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_player_config_tolerates_missing_sections() {
        let media = parse_player_config("{}").unwrap();
        assert_eq!(media.download_url, None);
        assert_eq!(media.duration, None);
        assert!(matches!(
            parse_player_config("<html>"),
            Err(ScrapeError::Payload(_))
        ));
    }

    #[tokio::test]
    async fn test_read_listing() {
        let a = adapter(BASE_URL, LISTING);
        let candidates = a.read_listing().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source_id, "human-rights-day");
        assert_eq!(candidates[0].hints.title.as_deref(), Some("Human rights day"));
    }

    #[tokio::test]
    async fn test_missing_iframe_is_a_skip() {
        let a = adapter("https://www.coe.int/en/web/portal/-/x", "<p>Text only</p>");
        assert_eq!(a.read_vimeo_id("https://www.coe.int/en/web/portal/-/x").await.unwrap(), None);

        let a = adapter(
            "https://www.coe.int/en/web/portal/-/y",
            r#"<iframe src="https://player.vimeo.com/video/555"></iframe>"#,
        );
        assert_eq!(
            a.read_vimeo_id("https://www.coe.int/en/web/portal/-/y").await.unwrap().as_deref(),
            Some("555")
        );
    }

    #[tokio::test]
    async fn test_fetch_detail_reads_player_config() {
        let a = scripted(Ok(CONFIG.to_string()));
        let candidate = CandidateRef::new("ministers", "https://www.coe.int/en/web/portal/-/ministers");
        let detail = a.fetch_detail(&candidate).await.unwrap().unwrap();

        assert_eq!(detail.source_id.as_deref(), Some("777"));
        assert_eq!(detail.download_url.as_deref(), Some("https://vod.example/1080.mp4"));
        assert_eq!(detail.duration.as_deref(), Some("00:12:34"));
    }

    #[tokio::test]
    async fn test_unavailable_player_config_keeps_video() {
        let a = scripted(Err(StatusCode::FORBIDDEN));
        let candidate = CandidateRef::new("ministers", "https://www.coe.int/en/web/portal/-/ministers");
        let detail = a.fetch_detail(&candidate).await.unwrap().unwrap();
        assert_eq!(detail.source_id.as_deref(), Some("777"));
        assert_eq!(detail.title.as_deref(), Some("Committee of Ministers"));
        assert_eq!(detail.download_url, None);

        let store = SqliteRecordStore::open_in_memory().unwrap();
        let summary = fast_pipeline().run(&a, &store).await.unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.failed, 0);

        let stored = store.get("777").await.unwrap().unwrap();
        assert_eq!(stored.title, "Committee of Ministers");
        assert_eq!(stored.published_date, UNKNOWN_DATE);
        assert_eq!(stored.duration, ZERO_DURATION);
        assert_eq!(stored.download_url, NO_DOWNLOAD);
    }

    #[tokio::test]
    async fn test_malformed_player_config_keeps_video() {
        let a = scripted(Ok("<html>blocked</html>".to_string()));
        let candidate = CandidateRef::new("ministers", "https://www.coe.int/en/web/portal/-/ministers");
        let detail = a.fetch_detail(&candidate).await.unwrap().unwrap();
        assert_eq!(detail.source_id.as_deref(), Some("777"));
        assert_eq!(detail.published, None);
        assert_eq!(detail.duration, None);
    }
}
