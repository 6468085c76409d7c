//! Static HTTP page driver built on `reqwest` and `scraper`.
//!
//! Pages are fetched with a cookie-keeping client and parsed as plain HTML.
//! There is no script engine, so interactive actions are emulated:
//!
//! - `click` on a link follows its `href` (fragment and `javascript:` links do nothing)
//! - `click` on a submit control posts the enclosing form, including values set with `fill`
//! - any other `click` does nothing
//! - `wait_for` inspects the current document once; a static page cannot change
//! - `await_response_matching` requests the pattern directly, so it must be an absolute URL
//!
//! Descriptors follow the grammar in [`super::dom`].

use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use scraper::{ElementRef, Selector};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

use super::dom::{Descriptor, Snapshot, text_of};
use super::{PageDriver, ReadySignal, WaitOptions};
use crate::error::ScrapeError;

/// User-Agent string mimicking a desktop browser session.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
struct LoadedPage {
    url: Url,
    html: String,
}

/// What a click amounts to on a static document.
#[derive(Debug, PartialEq, Eq)]
enum ClickAction {
    Follow(Url),
    Submit {
        method: Method,
        action: Url,
        fields: Vec<(String, String)>,
    },
    Nothing,
}

/// [`PageDriver`] over plain HTTP requests.
pub struct HttpPageDriver {
    client: Client,
    /// Budget for actions that load a page without their own timeout.
    action_timeout: Duration,
    page: Mutex<Option<LoadedPage>>,
    /// Values typed with `fill`, keyed by input name. Cleared on navigation.
    filled: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for HttpPageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPageDriver")
            .field("action_timeout", &self.action_timeout)
            .finish()
    }
}

impl HttpPageDriver {
    /// Build a driver with its own cookie jar, so sessions stay per source.
    pub fn new(action_timeout: Duration) -> Result<Self, ScrapeError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.9"),
        );
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            action_timeout,
            page: Mutex::new(None),
            filled: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the current document without a request.
    #[cfg(test)]
    pub(crate) fn load_html(&self, url: &str, html: &str) {
        let url = Url::parse(url).expect("test url");
        self.set_page(LoadedPage {
            url,
            html: html.to_string(),
        });
    }

    fn set_page(&self, page: LoadedPage) {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner) = Some(page);
        self.filled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn current(&self) -> Result<LoadedPage, ScrapeError> {
        self.page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ScrapeError::NoPage)
    }

    fn snapshot(&self) -> Result<Snapshot, ScrapeError> {
        let page = self.current()?;
        Ok(Snapshot::parse(page.url, &page.html))
    }

    /// Send `request` within `timeout` and return the final URL and body.
    async fn fetch(
        &self,
        request: RequestBuilder,
        what: &str,
        timeout: Duration,
    ) -> Result<(Url, String), ScrapeError> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let final_url = response.url().clone();
            if !status.is_success() {
                return Err(ScrapeError::Http {
                    status,
                    url: final_url.to_string(),
                });
            }
            let body = response.text().await?;
            Ok((final_url, body))
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ScrapeError::Timeout {
                what: what.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    async fn load(
        &self,
        request: RequestBuilder,
        what: &str,
        timeout: Duration,
    ) -> Result<(), ScrapeError> {
        let (url, html) = self.fetch(request, what, timeout).await?;
        debug!(%url, bytes = html.len(), "Loaded page");
        self.set_page(LoadedPage { url, html });
        Ok(())
    }

    fn missing(&self, descriptor: &str) -> ScrapeError {
        ScrapeError::Timeout {
            what: descriptor.to_string(),
            timeout_ms: self.action_timeout.as_millis() as u64,
        }
    }

    fn click_action(&self, page: &Snapshot, descriptor: &str) -> Result<ClickAction, ScrapeError> {
        let matches = page.select(&Descriptor::parse(descriptor)?)?;
        let el = matches.first().ok_or_else(|| self.missing(descriptor))?;
        let tag = el.value().name();

        if tag == "a" {
            return Ok(match el.value().attr("href").map(str::trim) {
                Some(href) if !href.starts_with('#') && !href.starts_with("javascript:") => {
                    ClickAction::Follow(page.url().join(href)?)
                }
                _ => ClickAction::Nothing,
            });
        }

        let is_submit = match tag {
            "button" => el.value().attr("type").is_none_or(|t| t.eq_ignore_ascii_case("submit")),
            "input" => el.value().attr("type").is_some_and(|t| t.eq_ignore_ascii_case("submit")),
            _ => false,
        };
        if !is_submit {
            return Ok(ClickAction::Nothing);
        }

        let Some(form) = el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| a.value().name() == "form")
        else {
            return Ok(ClickAction::Nothing);
        };

        let filled = self
            .filled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut fields = form_fields(&form, &filled);
        if let Some(name) = el.value().attr("name") {
            fields.push((name.to_string(), el.value().attr("value").unwrap_or("").to_string()));
        }

        let action = match form.value().attr("action").map(str::trim) {
            Some(a) if !a.is_empty() => page.url().join(a)?,
            _ => page.url().clone(),
        };
        let method = match form.value().attr("method") {
            Some(m) if m.eq_ignore_ascii_case("post") => Method::POST,
            _ => Method::GET,
        };

        Ok(ClickAction::Submit {
            method,
            action,
            fields,
        })
    }
}

/// Successful controls of `form`, with `filled` values taking precedence.
fn form_fields(form: &ElementRef, filled: &HashMap<String, String>) -> Vec<(String, String)> {
    let controls = Selector::parse("input[name], textarea[name], select[name]")
        .expect("static selector");
    let mut fields = Vec::new();

    for control in form.select(&controls) {
        let value = control.value();
        let Some(name) = value.attr("name") else {
            continue;
        };
        let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
        if matches!(kind.as_str(), "submit" | "button" | "image" | "reset" | "file") {
            continue;
        }
        if matches!(kind.as_str(), "checkbox" | "radio") && value.attr("checked").is_none() {
            continue;
        }

        let current = match filled.get(name) {
            Some(v) => v.clone(),
            None if value.name() == "textarea" => text_of(&control),
            None => value.attr("value").unwrap_or("").to_string(),
        };
        fields.push((name.to_string(), current));
    }

    // Filled inputs outside the form markup are still sent.
    for (name, v) in filled {
        if !fields.iter().any(|(n, _)| n == name) {
            fields.push((name.clone(), v.clone()));
        }
    }
    fields
}

impl PageDriver for HttpPageDriver {
    #[instrument(level = "info", skip(self))]
    async fn navigate(
        &self,
        url: &str,
        ready: ReadySignal,
        timeout: Duration,
    ) -> Result<(), ScrapeError> {
        let target = Url::parse(url)?;
        debug!(?ready, "Static fetch; ready signal satisfied once the body arrives");
        self.load(self.client.get(target), url, timeout).await
    }

    async fn extract(&self, descriptor: &str) -> Result<Option<String>, ScrapeError> {
        self.snapshot()?.first(descriptor)
    }

    async fn extract_all(&self, descriptor: &str) -> Result<Vec<String>, ScrapeError> {
        self.snapshot()?.all(descriptor)
    }

    async fn extract_rows(
        &self,
        container: &str,
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, ScrapeError> {
        self.snapshot()?.rows(container, fields)
    }

    #[instrument(level = "debug", skip(self))]
    async fn click(&self, descriptor: &str) -> Result<(), ScrapeError> {
        let action = {
            let page = self.snapshot()?;
            self.click_action(&page, descriptor)?
        };
        match action {
            ClickAction::Follow(url) => {
                let what = url.to_string();
                self.load(self.client.get(url), &what, self.action_timeout)
                    .await
            }
            ClickAction::Submit {
                method,
                action,
                fields,
            } => {
                info!(%action, %method, field_count = fields.len(), "Submitting form");
                let what = action.to_string();
                let request = if method == Method::POST {
                    self.client.post(action).form(&fields)
                } else {
                    self.client.get(action).query(&fields)
                };
                self.load(request, &what, self.action_timeout).await
            }
            ClickAction::Nothing => {
                debug!("Click has no effect on a static document");
                Ok(())
            }
        }
    }

    async fn fill(&self, descriptor: &str, value: &str) -> Result<(), ScrapeError> {
        let parsed = Descriptor::parse(descriptor)?;
        let name = {
            let page = self.snapshot()?;
            let matches = page.select(&parsed)?;
            let el = matches.first().ok_or_else(|| self.missing(descriptor))?;
            el.value()
                .attr("name")
                .map(str::to_string)
                .ok_or_else(|| ScrapeError::Unsupported(format!("fill on unnamed input {descriptor}")))?
        };
        self.filled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value.to_string());
        Ok(())
    }

    async fn wait_for(&self, descriptor: &str, options: WaitOptions) -> Result<(), ScrapeError> {
        let satisfied = self.snapshot()?.satisfies(descriptor, options.state)?;

        if satisfied {
            Ok(())
        } else {
            Err(ScrapeError::Timeout {
                what: format!("{descriptor} to be {:?}", options.state),
                timeout_ms: options.timeout.as_millis() as u64,
            })
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn await_response_matching(
        &self,
        url_pattern: &str,
        timeout: Duration,
    ) -> Result<String, ScrapeError> {
        let target = Url::parse(url_pattern)?;
        let (_, body) = self
            .fetch(self.client.get(target), url_pattern, timeout)
            .await?;
        Ok(body)
    }

    #[instrument(level = "debug", skip(self))]
    async fn resolve_url(&self, url: &str) -> Result<String, ScrapeError> {
        let target = Url::parse(url)?;
        let exchange = async {
            let mut response = self.client.head(target.clone()).send().await?;
            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                response = self.client.get(target).send().await?;
            }
            let status = response.status();
            if !status.is_success() {
                return Err(ScrapeError::Http {
                    status,
                    url: response.url().to_string(),
                });
            }
            Ok(response.url().to_string())
        };

        tokio::time::timeout(self.action_timeout, exchange)
            .await
            .map_err(|_| ScrapeError::Timeout {
                what: url.to_string(),
                timeout_ms: self.action_timeout.as_millis() as u64,
            })?
    }
}
