//! Page drivers: the boundary between source adapters and the web.
//!
//! Adapters never talk to the network directly. They describe what to load
//! and which fields to pull out, and a [`PageDriver`] does the mechanics.
//! Descriptors are opaque to the rest of the crate; only the driver
//! interprets them.
//!
//! Every method takes `&self`. The driver keeps its current document behind
//! interior mutability so a retried closure can hold a shared borrow of the
//! adapter that owns it.
//!
//! | Driver | Module | Notes |
//! |--------|--------|-------|
//! | HTTP fetch + HTML parse | [`http`] | No script engine; see module docs for how clicks and waits behave |
//! | Headless Chromium | `browser` | Feature `browser`; runs page scripts |
//!
//! Both resolve descriptors through [`dom`].

#[cfg(feature = "browser")]
pub mod browser;
pub(crate) mod dom;
pub mod http;

use std::time::Duration;

use crate::error::ScrapeError;

#[cfg(feature = "browser")]
pub use browser::BrowserPageDriver;
pub use http::HttpPageDriver;

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    DomContentLoaded,
    NetworkIdle,
}

/// The element state a [`PageDriver::wait_for`] call waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Attached,
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub state: WaitState,
    pub timeout: Duration,
}

impl WaitOptions {
    pub fn visible(timeout: Duration) -> Self {
        Self {
            state: WaitState::Visible,
            timeout,
        }
    }

    pub fn hidden(timeout: Duration) -> Self {
        Self {
            state: WaitState::Hidden,
            timeout,
        }
    }
}

/// Navigation and extraction primitives used by source adapters.
///
/// Every wait carries a timeout; running out of it is a transient
/// [`ScrapeError::Timeout`].
pub trait PageDriver {
    /// Load `url` and make it the current document.
    async fn navigate(
        &self,
        url: &str,
        ready: ReadySignal,
        timeout: Duration,
    ) -> Result<(), ScrapeError>;

    /// First match of `descriptor` in the current document, trimmed.
    async fn extract(&self, descriptor: &str) -> Result<Option<String>, ScrapeError>;

    /// Every match of `descriptor` in the current document, trimmed.
    async fn extract_all(&self, descriptor: &str) -> Result<Vec<String>, ScrapeError>;

    /// For every match of `container`, resolve each of `fields` relative to it.
    ///
    /// Rows stay aligned even when a field is missing from some containers.
    async fn extract_rows(
        &self,
        container: &str,
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, ScrapeError>;

    async fn click(&self, descriptor: &str) -> Result<(), ScrapeError>;

    /// Type `value` into the input matched by `descriptor`.
    async fn fill(&self, descriptor: &str, value: &str) -> Result<(), ScrapeError>;

    async fn wait_for(&self, descriptor: &str, options: WaitOptions) -> Result<(), ScrapeError>;

    /// Body of the next response whose URL matches `url_pattern`.
    async fn await_response_matching(
        &self,
        url_pattern: &str,
        timeout: Duration,
    ) -> Result<String, ScrapeError>;

    /// Final location of `url` after following redirects.
    async fn resolve_url(&self, url: &str) -> Result<String, ScrapeError>;
}
