// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wildcard URL patterns used to pick dictionaries
//!
//! A pattern is literal text where each `*` stands for any run of characters (possibly
//! empty). Patterns beginning with `http://` or `https://` are compared against the whole
//! URL; all others are compared against the URL's path only. A match may occur anywhere in
//! the compared text, so `main*` matches `/app2/main.js`.

use std::borrow::Cow;

use regex::Regex;

/// A compiled wildcard pattern.
#[derive(Clone, Debug)]
pub struct UrlPattern {
    raw: String,
    regex: Option<Regex>,
    absolute: bool,
}

impl UrlPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let regex = if raw.is_empty() {
            None
        } else {
            Regex::new(&regex::escape(&raw).replace(r"\*", ".*")).ok()
        };
        let absolute = has_scheme(&raw);
        Self {
            raw,
            regex,
            absolute,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this pattern includes a scheme (and so is compared to entire URLs).
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn matches(&self, url: &str) -> bool {
        let Some(regex) = &self.regex else {
            return false;
        };
        match comparison_target(self.absolute, url) {
            Some(target) => regex.is_match(&target),
            None => false,
        }
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for UrlPattern {}

impl From<&str> for UrlPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

impl From<String> for UrlPattern {
    fn from(pattern: String) -> Self {
        Self::new(pattern)
    }
}

/// One-shot form of [`UrlPattern::matches`].
pub fn matches(pattern: &str, url: &str) -> bool {
    UrlPattern::new(pattern).matches(url)
}

fn has_scheme(pattern: &str) -> bool {
    pattern.starts_with("http://") || pattern.starts_with("https://")
}

/// Picks the part of `url` a pattern is compared against.
///
/// Returns `None` when nothing in `url` can match: it's unparseable, or the pattern names a
/// scheme and host but `url` is relative.
fn comparison_target(pattern_is_absolute: bool, url: &str) -> Option<Cow<'_, str>> {
    match url::Url::parse(url) {
        Ok(_) if pattern_is_absolute => Some(Cow::Borrowed(url)),
        Ok(parsed) => Some(Cow::Owned(parsed.path().to_owned())),
        Err(url::ParseError::RelativeUrlWithoutBase) if !pattern_is_absolute => {
            Some(Cow::Borrowed(relative_path(url)))
        }
        Err(_) => None,
    }
}

/// Everything before any query or fragment.
fn relative_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_patterns() {
        let cases = [
            ("/app1/main*", "https://www.example.com/app1/main_12345.js", true),
            ("main*", "https://www.example.com/app1/main_1.js", true),
            ("main*", "https://www.example.com/app2/main.xyz.js", true),
            ("/app2/main*", "/app2/main_12345.js", true),
            ("/app1/main*", "/app2/main_12345.js", false),
            ("/app1/main*", "main_12345.js", false),
            ("/app1/*", "https://www.example.com/app1/", true),
            ("https://www.example.com/app1/*", "https://www.example.com/app1/main_12345.js", true),
            ("https://www.example.com/app1/*", "https://www.example2.com/app1/main_12345.js", false),
            ("/app1/main*", "https://x/app1/main_1.js", true),
            ("/app1/main*", "https://x/app2/x.js", false),
            ("main*", "https://x/app2/main.js", true),
            ("https://a.example/app1/*", "https://b.example/app1/x", false),
            ("/app1/main*", "main_1.js", false),
        ];
        for (pattern, url, expected) in cases {
            assert_eq!(matches(pattern, url), expected, "matches({pattern:?}, {url:?})");
        }
    }

    #[test]
    fn metacharacters_are_literal() {
        assert!(matches("/v1.0/(data)+*", "https://x/v1.0/(data)+/rows.csv"));
        assert!(!matches("/v1.0/*", "https://x/v1x0/rows.csv"));
        assert!(!matches("/a?b", "/ab"));
    }

    #[test]
    fn path_patterns_ignore_host_and_query() {
        assert!(!matches("example.com*", "https://example.com/data"));
        assert!(!matches("*limit=5", "https://example.com/data?limit=5"));
        assert!(matches("/data", "/data?limit=5"));
    }

    #[test]
    fn absolute_patterns_never_match_relative_urls() {
        assert!(!matches("https://example.com/*", "/app1/main.js"));
        assert!(!matches("https://*", "example.com/app1"));
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        assert!(!matches("", "https://example.com/"));
        assert!(!matches("", ""));
    }

    #[test]
    fn star_matches_everything() {
        let pattern = UrlPattern::new("*");
        assert!(pattern.matches("https://example.com/"));
        assert!(pattern.matches("/"));
        assert!(pattern.matches(""));
        assert!(!pattern.is_absolute());
    }
}
