//! NATO Multimedia portal.
//!
//! Browsing needs a logged-in session. [`SourceAdapter::authenticate`] opens
//! the login dialog on the search page, fills the form and waits for the user
//! menu to appear. Credentials come from configuration; without them the
//! source cannot run at all.

use std::fmt;

use tracing::{debug, info, instrument};

use super::{RecencyKey, SourceAdapter, Timeouts, last_path_segment};
use crate::driver::{PageDriver, ReadySignal, WaitOptions, WaitState};
use crate::error::ScrapeError;
use crate::models::{CandidateRef, RawDetail};
use crate::normalize::DateFormat;

pub const PROVIDER: &str = "NATO Multimedia";

const SEARCH_URL: &str = "https://www.natomultimedia.tv/app/search?s.q=&s.o=date&s.g=1&s.g=2&s.l=&s.df=&s.dt=&s.nr=&s.lm=&s.lmi=&s.lmc=&s%40action=search";

const LOGIN_BUTTON: &str = r##"button[data-target="#login"]"##;
const LOGIN_FORM: &str = "form#f48";
const EMAIL_FIELD: &str = "input#f49";
const PASSWORD_FIELD: &str = "input#f50";
const SUBMIT_BUTTON: &str = r#"button[name="login@action"]"#;
const USER_MENU: &str = "button#dropdownMenu1";

const VIDEO_RESULT: &str = "div.media.video.result";
const RESULT_LINK: &str = "a @href";

const TITLE: &str = "h2.col-md-8";
const DESCRIPTION: &str = "div.col-md-12 div.metaValue";
const PUBLISHED_DATE: &str = "div.meta.col-md-4 div.asset-metadata-value";
const DURATION: &str = "div.type span";
const DOWNLOAD_DROPDOWN: &str = "button#openDownload";
const DOWNLOAD_FULL_HD: &str = r#"a:has-text("Full HD")"#;

/// Login for the portal.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Both parts present and non-blank, or nothing.
    pub fn from_parts(email: Option<String>, password: Option<String>) -> Option<Self> {
        match (email, password) {
            (Some(email), Some(password))
                if !email.trim().is_empty() && !password.trim().is_empty() =>
            {
                Some(Self { email, password })
            }
            _ => None,
        }
    }
}

pub struct Nato<D> {
    driver: D,
    timeouts: Timeouts,
    credentials: Option<Credentials>,
}

impl<D: PageDriver> Nato<D> {
    pub fn new(driver: D, timeouts: Timeouts, credentials: Option<Credentials>) -> Self {
        Self {
            driver,
            timeouts,
            credentials,
        }
    }

    async fn read_listing(&self) -> Result<Vec<CandidateRef>, ScrapeError> {
        let rows = self
            .driver
            .extract_rows(VIDEO_RESULT, &[RESULT_LINK])
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row[0].take())
            .map(|href| CandidateRef::new(last_path_segment(&href), href))
            .collect())
    }

    async fn read_detail(&self) -> Result<RawDetail, ScrapeError> {
        let d = &self.driver;
        Ok(RawDetail {
            source_id: None,
            title: d.extract(TITLE).await?,
            published: d.extract(PUBLISHED_DATE).await?,
            description: d.extract(DESCRIPTION).await?,
            personalities: Vec::new(),
            duration: d.extract(DURATION).await?,
            download_url: None,
        })
    }

    /// Open the download menu and read the Full HD link. Best-effort.
    async fn read_download_link(&self) -> Option<String> {
        let element = WaitOptions::visible(self.timeouts.element);
        let opened = async {
            self.driver.wait_for(DOWNLOAD_DROPDOWN, element).await?;
            self.driver.click(DOWNLOAD_DROPDOWN).await?;
            self.driver.wait_for(DOWNLOAD_FULL_HD, element).await?;
            self.driver
                .extract(&format!("{DOWNLOAD_FULL_HD} @href"))
                .await
        };
        match opened.await {
            Ok(link) => link,
            Err(e) => {
                debug!(error = %e, "No Full HD download link");
                None
            }
        }
    }
}

impl<D: PageDriver> SourceAdapter for Nato<D> {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn recency_key(&self) -> RecencyKey {
        RecencyKey::PagePosition
    }

    fn date_format(&self) -> DateFormat {
        DateFormat::LongForm
    }

    #[instrument(level = "info", skip(self), fields(source = PROVIDER))]
    async fn authenticate(&self) -> Result<(), ScrapeError> {
        let Some(credentials) = &self.credentials else {
            return Err(ScrapeError::Authentication(
                "no NATO credentials configured".to_string(),
            ));
        };

        let element = self.timeouts.element;
        self.driver
            .navigate(
                SEARCH_URL,
                ReadySignal::DomContentLoaded,
                self.timeouts.navigation,
            )
            .await?;
        self.driver.click(LOGIN_BUTTON).await?;
        self.driver
            .wait_for(
                LOGIN_FORM,
                WaitOptions {
                    state: WaitState::Attached,
                    timeout: element,
                },
            )
            .await?;
        self.driver.fill(EMAIL_FIELD, &credentials.email).await?;
        self.driver.fill(PASSWORD_FIELD, &credentials.password).await?;
        self.driver.click(SUBMIT_BUTTON).await?;

        match self
            .driver
            .wait_for(USER_MENU, WaitOptions::visible(self.timeouts.navigation))
            .await
        {
            Ok(()) => {}
            Err(ScrapeError::Timeout { .. }) => {
                return Err(ScrapeError::Authentication(
                    "login was not confirmed".to_string(),
                ));
            }
            Err(e) => return Err(e),
        }
        if let Err(e) = self
            .driver
            .wait_for(LOGIN_FORM, WaitOptions::hidden(element))
            .await
        {
            debug!(error = %e, "Login form still present after login");
        }

        info!("Logged in");
        Ok(())
    }

    #[instrument(level = "info", skip(self), fields(source = PROVIDER))]
    async fn list_recent(&self, limit: usize) -> Result<Vec<CandidateRef>, ScrapeError> {
        self.driver
            .navigate(SEARCH_URL, ReadySignal::NetworkIdle, self.timeouts.navigation)
            .await?;
        self.driver
            .wait_for(VIDEO_RESULT, WaitOptions::visible(self.timeouts.element))
            .await?;

        let candidates = self.read_listing().await?;
        info!(count = candidates.len(), limit, "Indexed NATO videos");
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
            .wait_for(TITLE, WaitOptions::visible(self.timeouts.element))
            .await?;

        let mut detail = self.read_detail().await?;
        detail.download_url = self.read_download_link().await;
        Ok(Some(detail))
    }
}
