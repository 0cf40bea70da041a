//! Listen-path classification.
//!
//! A listen path is either literal (`/users`) or ends in a wildcard segment
//! (`/users/*`, `/users/*rest`). Wildcard paths need their literal prefix
//! bound as well, otherwise a request for the bare prefix would not match.
use std::sync::LazyLock;

use regex::Regex;

static WILDCARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*(.+)?").expect("wildcard pattern is a valid regex"));

/// Detects wildcard listen paths and extracts their literal prefix
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenPathMatcher;

impl ListenPathMatcher {
    pub fn new() -> Self {
        Self
    }

    /// True when `listen_path` contains a wildcard segment.
    pub fn matches(&self, listen_path: &str) -> bool {
        WILDCARD.is_match(listen_path)
    }

    /// The literal prefix in front of the wildcard: `/v1/*` becomes `/v1`.
    ///
    /// Only meaningful when [`matches`](Self::matches) returned true; a
    /// literal path is returned unchanged.
    pub fn extract(&self, listen_path: &str) -> String {
        WILDCARD.replace_all(listen_path, "").into_owned()
    }

    /// Name of the wildcard capture (`/v1/*rest` gives `rest`), if it is a
    /// plain identifier.
    pub fn wildcard_name<'a>(&self, listen_path: &'a str) -> Option<&'a str> {
        let name = WILDCARD.captures(listen_path)?.get(1)?.as_str();
        name.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
            .then_some(name)
    }
}
