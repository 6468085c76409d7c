//! Headless Chromium page driver built on `chromiumoxide`.
//!
//! Scripts run, so listings rendered client-side and session cookies set by
//! JavaScript behave as they do for a visitor. Descriptors are resolved
//! against a snapshot of the live DOM using the same rules as the HTTP
//! driver; `click` and `fill` act on the first match through injected
//! scripts.
//!
//! `await_response_matching` and `resolve_url` issue an in-page `fetch` with
//! the page's credentials, so the request carries the session the page
//! built up.
//!
//! Only compiled with the `browser` feature. A Chrome or Chromium binary
//! must be discoverable on the host.

use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use url::Url;

use super::dom::{Descriptor, Snapshot};
use super::http::USER_AGENT;
use super::{PageDriver, ReadySignal, WaitOptions};
use crate::error::ScrapeError;

/// Extra wait after a navigation that asked for network idle.
const IDLE_SETTLE: Duration = Duration::from_millis(500);
/// Wait after a click for any navigation or re-render it started.
const CLICK_SETTLE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// [`PageDriver`] over a headless Chromium tab.
pub struct BrowserPageDriver {
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    action_timeout: Duration,
}

impl std::fmt::Debug for BrowserPageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserPageDriver")
            .field("action_timeout", &self.action_timeout)
            .finish()
    }
}

impl Drop for BrowserPageDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

impl BrowserPageDriver {
    /// Launch a headless browser with one blank tab.
    pub async fn launch(action_timeout: Duration) -> Result<Self, ScrapeError> {
        let config = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .build()
            .map_err(ScrapeError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.execute(SetUserAgentOverrideParams::new(USER_AGENT.to_string()))
            .await?;
        info!("Launched headless browser");

        Ok(Self {
            _browser: browser,
            page,
            handler,
            action_timeout,
        })
    }

    async fn snapshot(&self) -> Result<Snapshot, ScrapeError> {
        let url = self.page.url().await?.ok_or(ScrapeError::NoPage)?;
        let html = self.page.content().await?;
        Ok(Snapshot::parse(Url::parse(&url)?, &html))
    }

    /// Run `script` and decode the value it resolves to.
    async fn evaluate<T: serde::de::DeserializeOwned>(
        &self,
        script: String,
        what: &str,
        timeout: Duration,
    ) -> Result<T, ScrapeError> {
        let result = tokio::time::timeout(timeout, self.page.evaluate(script))
            .await
            .map_err(|_| timed_out(what, timeout))??;
        result
            .into_value()
            .map_err(|e| ScrapeError::Payload(format!("script result for {what}: {e}")))
    }

    /// Apply `action` to the first element matching `descriptor`.
    async fn act_on(&self, descriptor: &str, action: &str) -> Result<(), ScrapeError> {
        let parsed = Descriptor::parse(descriptor)?;
        if parsed.refers_to_self() {
            return Err(ScrapeError::Unsupported(format!(
                "{descriptor} names no element"
            )));
        }
        let found: bool = self
            .evaluate(element_script(&parsed, action)?, descriptor, self.action_timeout)
            .await?;
        if found {
            Ok(())
        } else {
            Err(timed_out(descriptor, self.action_timeout))
        }
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Fetched, ScrapeError> {
        let target = Url::parse(url)?;
        let fetched: Fetched = self
            .evaluate(fetch_script(target.as_str())?, url, timeout)
            .await?;
        if let Some(error) = &fetched.error {
            return Err(ScrapeError::Browser(format!("fetch {url}: {error}")));
        }
        let status = StatusCode::from_u16(fetched.status).unwrap_or(StatusCode::BAD_GATEWAY);
        if !status.is_success() {
            return Err(ScrapeError::Http {
                status,
                url: fetched.url.clone(),
            });
        }
        Ok(fetched)
    }
}

fn timed_out(what: &str, timeout: Duration) -> ScrapeError {
    ScrapeError::Timeout {
        what: what.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

/// Outcome of the in-page `fetch` issued by [`fetch_script`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Fetched {
    status: u16,
    url: String,
    body: String,
    error: Option<String>,
}

/// Script resolving to whether an element matched; `action` runs with the
/// match bound to `el`.
fn element_script(descriptor: &Descriptor, action: &str) -> Result<String, ScrapeError> {
    let css = serde_json::to_string(descriptor.css())
        .map_err(|e| ScrapeError::Payload(e.to_string()))?;
    let needle = serde_json::to_string(&descriptor.has_text())
        .map_err(|e| ScrapeError::Payload(e.to_string()))?;
    Ok(format!(
        r#"(() => {{
    const needle = {needle};
    const el = Array.from(document.querySelectorAll({css}))
        .find(e => needle === null || (e.textContent || '').includes(needle));
    if (!el) return false;
    {action}
    return true;
}})()"#
    ))
}

fn click_action() -> &'static str {
    "el.click();"
}

fn fill_action(value: &str) -> Result<String, ScrapeError> {
    let value = serde_json::to_string(value).map_err(|e| ScrapeError::Payload(e.to_string()))?;
    Ok(format!(
        "el.focus(); el.value = {value}; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }}));"
    ))
}

fn fetch_script(url: &str) -> Result<String, ScrapeError> {
    let url = serde_json::to_string(url).map_err(|e| ScrapeError::Payload(e.to_string()))?;
    Ok(format!(
        r#"(async () => {{
    try {{
        const response = await fetch({url}, {{ method: 'GET', credentials: 'include' }});
        const body = await response.text();
        return {{ status: response.status, url: response.url, body }};
    }} catch (e) {{
        return {{ error: e.toString() }};
    }}
}})()"#
    ))
}

impl PageDriver for BrowserPageDriver {
    #[instrument(level = "info", skip(self))]
    async fn navigate(
        &self,
        url: &str,
        ready: ReadySignal,
        timeout: Duration,
    ) -> Result<(), ScrapeError> {
        let target = Url::parse(url)?;
        tokio::time::timeout(timeout, self.page.goto(target.as_str()))
            .await
            .map_err(|_| timed_out(url, timeout))??;
        if ready == ReadySignal::NetworkIdle {
            tokio::time::sleep(IDLE_SETTLE).await;
        }
        debug!("Page loaded");
        Ok(())
    }

    async fn extract(&self, descriptor: &str) -> Result<Option<String>, ScrapeError> {
        self.snapshot().await?.first(descriptor)
    }

    async fn extract_all(&self, descriptor: &str) -> Result<Vec<String>, ScrapeError> {
        self.snapshot().await?.all(descriptor)
    }

    async fn extract_rows(
        &self,
        container: &str,
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, ScrapeError> {
        self.snapshot().await?.rows(container, fields)
    }

    #[instrument(level = "debug", skip(self))]
    async fn click(&self, descriptor: &str) -> Result<(), ScrapeError> {
        self.act_on(descriptor, click_action()).await?;
        tokio::time::sleep(CLICK_SETTLE).await;
        Ok(())
    }

    async fn fill(&self, descriptor: &str, value: &str) -> Result<(), ScrapeError> {
        self.act_on(descriptor, &fill_action(value)?).await
    }

    async fn wait_for(&self, descriptor: &str, options: WaitOptions) -> Result<(), ScrapeError> {
        Descriptor::parse(descriptor)?;
        let deadline = Instant::now() + options.timeout;
        loop {
            if self.snapshot().await?.satisfies(descriptor, options.state)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(timed_out(
                    &format!("{descriptor} to be {:?}", options.state),
                    options.timeout,
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn await_response_matching(
        &self,
        url_pattern: &str,
        timeout: Duration,
    ) -> Result<String, ScrapeError> {
        let fetched = self.fetch(url_pattern, timeout).await?;
        debug!(bytes = fetched.body.len(), "Captured response");
        Ok(fetched.body)
    }

    async fn resolve_url(&self, url: &str) -> Result<String, ScrapeError> {
        let fetched = self.fetch(url, self.action_timeout).await?;
        Ok(if fetched.url.is_empty() {
            url.to_string()
        } else {
            fetched.url
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_script_quotes_selector_and_text() {
        let d = Descriptor::parse(r#"button[name="login"]:has-text("Log in")"#).unwrap();
        let script = element_script(&d, click_action()).unwrap();

        assert!(script.contains(r#"document.querySelectorAll("button[name=\"login\"]")"#));
        assert!(script.contains(r#"const needle = "Log in";"#));
        assert!(script.contains("el.click();"));
    }

    #[test]
    fn test_element_script_without_text_filter() {
        let d = Descriptor::parse("input#email").unwrap();
        let script = element_script(&d, "").unwrap();
        assert!(script.contains("const needle = null;"));
    }

    #[test]
    fn test_fill_value_is_escaped() {
        let action = fill_action("it's \"quoted\"\n</script>").unwrap();
        assert!(action.contains(r#"el.value = "it's \"quoted\"\n</script>";"#));
        assert!(action.contains("new Event('input'"));
    }

    #[test]
    fn test_fetch_script_sends_credentials() {
        let script = fetch_script("https://player.vimeo.com/video/1/config").unwrap();
        assert!(script.contains(r#"fetch("https://player.vimeo.com/video/1/config""#));
        assert!(script.contains("credentials: 'include'"));
    }

    #[test]
    fn test_fetched_decodes_error_shape() {
        let failed: Fetched = serde_json::from_str(r#"{"error":"TypeError: Failed to fetch"}"#).unwrap();
        assert_eq!(failed.status, 0);
        assert_eq!(failed.error.as_deref(), Some("TypeError: Failed to fetch"));

        let ok: Fetched =
            serde_json::from_str(r#"{"status":200,"url":"https://a.example/x","body":"{}"}"#).unwrap();
        assert_eq!(ok.body, "{}");
        assert!(ok.error.is_none());
    }
}
