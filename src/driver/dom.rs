//! Descriptor parsing and matching over parsed HTML.
//!
//! Both drivers resolve descriptors the same way: the HTTP driver against the
//! fetched body, the browser driver against a snapshot of the live DOM.
//!
//! # Descriptors
//!
//! ```text
//! div.card h3 a                      text of the first match
//! section.avs-file a.ecl-link @href  attribute instead of text
//! span:has-text("Event date:")       matches whose text contains the quoted string
//! @href                              (row fields only) attribute of the container itself
//! ```
//!
//! `href` and `src` attributes are resolved against the page URL, the way a
//! browser exposes them.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::WaitState;
use crate::error::ScrapeError;

/// A parsed descriptor. See the module docs for the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Descriptor {
    css: String,
    has_text: Option<String>,
    attr: Option<String>,
}

const HAS_TEXT: &str = ":has-text(";

impl Descriptor {
    pub(crate) fn parse(raw: &str) -> Result<Self, ScrapeError> {
        let raw = raw.trim();
        let invalid = |reason: &str| ScrapeError::InvalidDescriptor {
            descriptor: raw.to_string(),
            reason: reason.to_string(),
        };

        let (rest, attr) = match raw.rfind('@') {
            Some(i)
                if (i == 0 || raw[..i].ends_with(char::is_whitespace))
                    && is_attr_name(&raw[i + 1..]) =>
            {
                (raw[..i].trim_end(), Some(raw[i + 1..].to_string()))
            }
            _ => (raw, None),
        };

        let (css, has_text) = match rest.find(HAS_TEXT) {
            Some(i) => {
                let inner = rest[i + HAS_TEXT.len()..]
                    .strip_suffix(')')
                    .ok_or_else(|| invalid(":has-text must close the selector"))?;
                let text = inner.trim().trim_matches(|c| c == '"' || c == '\'');
                if text.is_empty() {
                    return Err(invalid(":has-text needs a non-empty string"));
                }
                (rest[..i].trim().to_string(), Some(text.to_string()))
            }
            None => (rest.to_string(), None),
        };

        if css.is_empty() && has_text.is_some() {
            return Err(invalid(":has-text needs an element selector"));
        }

        Ok(Self {
            css,
            has_text,
            attr,
        })
    }

    pub(crate) fn css(&self) -> &str {
        &self.css
    }

    pub(crate) fn has_text(&self) -> Option<&str> {
        self.has_text.as_deref()
    }

    pub(crate) fn refers_to_self(&self) -> bool {
        self.css.is_empty()
    }

    pub(crate) fn selector(&self) -> Result<Selector, ScrapeError> {
        if self.css.is_empty() {
            return Err(ScrapeError::InvalidDescriptor {
                descriptor: self.css.clone(),
                reason: "empty selector".to_string(),
            });
        }
        Selector::parse(&self.css).map_err(|e| ScrapeError::InvalidDescriptor {
            descriptor: self.css.clone(),
            reason: e.to_string(),
        })
    }

    fn accepts(&self, el: &ElementRef) -> bool {
        self.has_text
            .as_deref()
            .is_none_or(|needle| text_of(el).contains(needle))
    }

    pub(crate) fn matches<'a>(&self, scope: ElementRef<'a>) -> Result<Vec<ElementRef<'a>>, ScrapeError> {
        let selector = self.selector()?;
        Ok(scope
            .select(&selector)
            .filter(|el| self.accepts(el))
            .collect())
    }

    pub(crate) fn value_of(&self, el: &ElementRef, base: &Url) -> Option<String> {
        let value = match self.attr.as_deref() {
            Some(name @ ("href" | "src")) => el
                .value()
                .attr(name)
                .map(|v| {
                    base.join(v.trim())
                        .map(String::from)
                        .unwrap_or_else(|_| v.trim().to_string())
                }),
            Some(name) => el.value().attr(name).map(|v| v.trim().to_string()),
            None => Some(text_of(el)),
        };
        value.filter(|v| !v.is_empty())
    }
}

fn is_attr_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

pub(crate) fn text_of(el: &ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn looks_hidden(el: &ElementRef) -> bool {
    let value = el.value();
    value.attr("hidden").is_some()
        || value.attr("aria-hidden") == Some("true")
        || value
            .attr("style")
            .is_some_and(|s| s.replace(' ', "").contains("display:none"))
}

/// A parsed document and the URL it was loaded from.
pub(crate) struct Snapshot {
    url: Url,
    doc: Html,
}

impl Snapshot {
    pub(crate) fn parse(url: Url, html: &str) -> Self {
        Self {
            url,
            doc: Html::parse_document(html),
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn select(&self, descriptor: &Descriptor) -> Result<Vec<ElementRef<'_>>, ScrapeError> {
        descriptor.matches(self.doc.root_element())
    }

    /// First non-empty value matched by `descriptor`.
    pub(crate) fn first(&self, descriptor: &str) -> Result<Option<String>, ScrapeError> {
        let parsed = Descriptor::parse(descriptor)?;
        Ok(self
            .select(&parsed)?
            .iter()
            .find_map(|el| parsed.value_of(el, &self.url)))
    }

    pub(crate) fn all(&self, descriptor: &str) -> Result<Vec<String>, ScrapeError> {
        let parsed = Descriptor::parse(descriptor)?;
        Ok(self
            .select(&parsed)?
            .iter()
            .filter_map(|el| parsed.value_of(el, &self.url))
            .collect())
    }

    /// One row per `container` match, each field resolved inside it.
    pub(crate) fn rows(
        &self,
        container: &str,
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, ScrapeError> {
        let container = Descriptor::parse(container)?;
        let fields = fields
            .iter()
            .map(|f| Descriptor::parse(f))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for item in self.select(&container)? {
            let mut row = Vec::with_capacity(fields.len());
            for field in &fields {
                let value = if field.refers_to_self() {
                    field.value_of(&item, &self.url)
                } else {
                    field
                        .matches(item)?
                        .iter()
                        .find_map(|el| field.value_of(el, &self.url))
                };
                row.push(value);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Whether the elements matched by `descriptor` are in `state` right now.
    pub(crate) fn satisfies(&self, descriptor: &str, state: WaitState) -> Result<bool, ScrapeError> {
        let parsed = Descriptor::parse(descriptor)?;
        let matches = self.select(&parsed)?;
        Ok(match state {
            WaitState::Attached => !matches.is_empty(),
            WaitState::Visible => matches.iter().any(|el| !looks_hidden(el)),
            WaitState::Hidden => matches.iter().all(looks_hidden),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <div class="card"><h3><a href="/videos/I-100">First   video</a></h3><p class="len">1:30</p></div>
        <div class="card"><h3><a href="/videos/I-101">Second video</a></h3></div>
        <p><strong>Duration:</strong> 00:02:10</p>
        <a id="tab" href="#downloads">Downloads</a>
        <div id="gone" style="display: none">hidden</div>
        <div id="aria" aria-hidden="true">hidden too</div>
    "##;

    fn snapshot() -> Snapshot {
        Snapshot::parse(Url::parse("https://example.org/search").unwrap(), PAGE)
    }

    #[test]
    fn test_descriptor_parsing() {
        let d = Descriptor::parse("section a.ecl-link @href").unwrap();
        assert_eq!(d.css, "section a.ecl-link");
        assert_eq!(d.attr.as_deref(), Some("href"));
        assert_eq!(d.has_text, None);

        let d = Descriptor::parse(r#"span:has-text("Event date:")"#).unwrap();
        assert_eq!(d.css, "span");
        assert_eq!(d.has_text.as_deref(), Some("Event date:"));

        let d = Descriptor::parse("@href").unwrap();
        assert!(d.refers_to_self());

        let d = Descriptor::parse("button[name=\"login@action\"]").unwrap();
        assert_eq!(d.attr, None);
    }

    #[test]
    fn test_descriptor_rejects_malformed() {
        assert!(Descriptor::parse(r#"span:has-text("x""#).is_err());
        assert!(Descriptor::parse(r#":has-text("x")"#).is_err());
        assert!(Descriptor::parse("div[[").unwrap().selector().is_err());
    }

    #[test]
    fn test_fragment_href_resolves_against_page() {
        assert_eq!(
            snapshot().first("a#tab @href").unwrap().as_deref(),
            Some("https://example.org/search#downloads")
        );
    }

    #[test]
    fn test_rows_and_text_whitespace() {
        let rows = snapshot().rows("div.card", &["h3 a", "p.len"]).unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("First video"));
        assert_eq!(rows[1][1], None);
    }

    #[test]
    fn test_satisfies() {
        let s = snapshot();
        assert!(s.satisfies("div.card", WaitState::Visible).unwrap());
        assert!(s.satisfies("#gone", WaitState::Attached).unwrap());
        assert!(!s.satisfies("#gone", WaitState::Visible).unwrap());
        assert!(s.satisfies("#aria", WaitState::Hidden).unwrap());
        assert!(s.satisfies("h1.missing", WaitState::Hidden).unwrap());
        assert!(!s.satisfies("h1.missing", WaitState::Attached).unwrap());
        assert!(
            s.satisfies(r#"p:has-text("Duration:")"#, WaitState::Visible)
                .unwrap()
        );
    }
}
