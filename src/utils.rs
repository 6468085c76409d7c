//! Small helpers shared across modules.
//!
//! - String truncation for log previews
//! - Name casing for personalities scraped in upper case
//! - Randomized pauses between page visits
//! - JSON truncation detection for analysis responses

use rand::{Rng, rng};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary)
/// with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Capitalize the first character of a string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(upcase("hello"), "Hello");
/// assert_eq!(upcase(""), "");
/// ```
pub fn upcase(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
    }
}

/// Title-case every word, including both halves of hyphenated names.
///
/// `"VON DER LEYEN"` becomes `"Von Der Leyen"`, `"JEAN-CLAUDE"` becomes
/// `"Jean-Claude"`.
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            word.split('-')
                .map(|part| upcase(&part.to_lowercase()))
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sleep for a random duration in `[min, max]`. A zero `max` returns at once.
pub async fn random_pause(min: Duration, max: Duration) {
    if max.is_zero() {
        return;
    }
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let ms = rng().random_range(lo.as_millis() as u64..=hi.as_millis() as u64);
    debug!(delay_ms = ms, "Pausing before next page");
    sleep(Duration::from_millis(ms)).await;
}
