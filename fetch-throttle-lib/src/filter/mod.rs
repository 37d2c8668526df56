//! Priority resolution for intercepted downloads.
//!
//! A download's priority comes from three sources, in increasing
//! precedence:
//!
//! 1. the default of its [`Destination`],
//! 2. the first [`PriorityFilter`] whose pattern matches its URL,
//! 3. an explicit [`PRIORITY_HEADER`] naming a valid [`Priority`].
mod regex_filter;

use log::{debug, trace};
use serde_json::Value;
use std::sync::LazyLock;

pub use regex_filter::{FilterSpec, PriorityFilter};

use crate::{Destination, Priority};

/// Request header that overrides every other priority source
pub const PRIORITY_HEADER: &str = "x-fetch-priority";

/// Loader and bootstrap scripts are never delayed
const BUILTIN_UNTHROTTLED_PATTERN: &str = r"(?:^|/)(?:loader|bootstrap)[^/]*\.m?js(?:[?#].*)?$";

#[allow(clippy::expect_used)]
static BUILTIN_FILTERS: LazyLock<Vec<PriorityFilter>> = LazyLock::new(|| {
    vec![
        PriorityFilter::new(BUILTIN_UNTHROTTLED_PATTERN, Priority::Unthrottled)
            .expect("built-in priority filter must compile"),
    ]
});

/// Ordered list of priority filters, evaluated first-match-wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PriorityFilters(Vec<PriorityFilter>);

impl PriorityFilters {
    /// Create a filter list from the given filters, keeping their order
    #[must_use]
    pub const fn new(filters: Vec<PriorityFilter>) -> Self {
        Self(filters)
    }

    /// A list without any filters
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Only the built-in filters, which exempt loader/bootstrap scripts
    #[must_use]
    pub fn builtin() -> Self {
        Self(BUILTIN_FILTERS.clone())
    }

    /// The built-in filters followed by `filters`.
    ///
    /// Built-in filters always come first and therefore win over any
    /// caller-supplied filter matching the same URL.
    #[must_use]
    pub fn with_builtin(filters: impl IntoIterator<Item = PriorityFilter>) -> Self {
        let mut all = BUILTIN_FILTERS.clone();
        all.extend(filters);
        Self(all)
    }

    /// Compile filters received in a message.
    ///
    /// Entries that are not objects, lack a string pattern or priority, use
    /// an unknown priority, or whose pattern does not compile are dropped
    /// individually; the remaining entries keep their order.
    #[must_use]
    pub fn from_wire(entries: &[Value]) -> Self {
        let filters = entries
            .iter()
            .filter_map(|entry| {
                let pattern = entry.get("pattern").and_then(Value::as_str);
                let priority = entry.get("priority").and_then(Value::as_str);
                let (Some(pattern), Some(priority)) = (pattern, priority) else {
                    debug!("Dropping malformed priority filter {entry}");
                    return None;
                };
                PriorityFilter::parse(pattern, priority)
                    .inspect_err(|e| debug!("Dropping priority filter: {e}"))
                    .ok()
            })
            .collect();
        Self(filters)
    }

    /// The priority of the first filter matching `url`, if any
    #[must_use]
    pub fn first_match(&self, url: &str) -> Option<Priority> {
        self.0
            .iter()
            .find(|filter| filter.is_match(url))
            .map(PriorityFilter::priority)
    }

    /// Iterate over the filters in matching order
    pub fn iter(&self) -> impl Iterator<Item = &PriorityFilter> {
        self.0.iter()
    }

    /// Number of filters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no filters at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The filters in their uncompiled form
    #[must_use]
    pub fn to_specs(&self) -> Vec<FilterSpec> {
        self.0.iter().map(FilterSpec::from).collect()
    }
}

impl From<Vec<PriorityFilter>> for PriorityFilters {
    fn from(filters: Vec<PriorityFilter>) -> Self {
        Self(filters)
    }
}

impl FromIterator<PriorityFilter> for PriorityFilters {
    fn from_iter<I: IntoIterator<Item = PriorityFilter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Decide the priority of a download.
///
/// An invalid `header` value is ignored, so the pattern or destination
/// result stands.
#[must_use]
pub fn resolve_priority(
    destination: &Destination,
    url: &str,
    header: Option<&str>,
    filters: &PriorityFilters,
) -> Priority {
    let mut priority = destination.default_priority();

    if let Some(matched) = filters.first_match(url) {
        trace!("{url} matched a priority filter: {matched}");
        priority = matched;
    }

    if let Some(header) = header {
        match Priority::parse(header.trim()) {
            Ok(explicit) => priority = explicit,
            Err(e) => debug!("Ignoring {PRIORITY_HEADER} on {url}: {e}"),
        }
    }

    priority
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn filters(specs: &[(&str, Priority)]) -> PriorityFilters {
        specs
            .iter()
            .map(|(pattern, priority)| PriorityFilter::new(pattern, *priority).unwrap())
            .collect()
    }

    #[rstest]
    #[case("https://example.com/loader.js")]
    #[case("https://example.com/static/loader.min.js?v=3")]
    #[case("https://example.com/bootstrap.mjs")]
    #[case("/bootstrap-4f2a.js#main")]
    fn test_builtin_exempts_loader_scripts(#[case] url: &str) {
        assert_eq!(
            PriorityFilters::builtin().first_match(url),
            Some(Priority::Unthrottled)
        );
    }

    #[rstest]
    #[case("https://example.com/app.js")]
    #[case("https://example.com/loader.css")]
    #[case("https://example.com/myloader.js")]
    #[case("https://example.com/loader/app.js")]
    fn test_builtin_leaves_other_urls_alone(#[case] url: &str) {
        assert_eq!(PriorityFilters::builtin().first_match(url), None);
    }

    #[test]
    fn test_builtin_comes_first() {
        let all = PriorityFilters::with_builtin(filters(&[(r"\.js$", Priority::Low)]).0);
        assert_eq!(all.len(), 2);
        assert_eq!(
            all.first_match("https://example.com/loader.js"),
            Some(Priority::Unthrottled)
        );
        assert_eq!(
            all.first_match("https://example.com/app.js"),
            Some(Priority::Low)
        );
    }

    #[test]
    fn test_first_match_wins() {
        let filters = filters(&[("cdn", Priority::High), (r"\.png$", Priority::Low)]);
        assert_eq!(
            filters.first_match("https://cdn.example.com/a.png"),
            Some(Priority::High)
        );
        assert_eq!(
            filters.first_match("https://example.com/a.png"),
            Some(Priority::Low)
        );
        assert_eq!(filters.first_match("https://example.com/a.gif"), None);
    }

    #[rstest]
    // destination defaults
    #[case("script", "https://x.test/app.js", None, Priority::High)]
    #[case("image", "https://x.test/a.png", None, Priority::Low)]
    #[case("style", "https://x.test/a.css", None, Priority::Unthrottled)]
    #[case("", "https://x.test/api", None, Priority::Low)]
    #[case("font", "https://x.test/a.woff2", None, Priority::Normal)]
    // pattern beats destination
    #[case("script", "https://x.test/feed.json", None, Priority::Low)]
    #[case("image", "https://x.test/hero.png", None, Priority::High)]
    // header beats pattern and destination
    #[case("image", "https://x.test/feed.json", Some("high"), Priority::High)]
    #[case("script", "https://x.test/app.js", Some("unthrottled"), Priority::Unthrottled)]
    // invalid header falls back
    #[case("image", "https://x.test/hero.png", Some("urgent"), Priority::High)]
    #[case("script", "https://x.test/app.js", Some(""), Priority::High)]
    #[case("image", "https://x.test/feed.json", Some("HIGH"), Priority::Low)]
    fn test_resolve_priority(
        #[case] destination: &str,
        #[case] url: &str,
        #[case] header: Option<&str>,
        #[case] expected: Priority,
    ) {
        let filters = filters(&[(r"\.json$", Priority::Low), ("hero", Priority::High)]);
        assert_eq!(
            resolve_priority(&Destination::from(destination), url, header, &filters),
            expected
        );
    }

    #[test]
    fn test_from_wire_drops_invalid_entries() {
        let entries = json!([
            { "pattern": "(", "priority": "low" },
            { "pattern": 5, "priority": "low" },
            { "pattern": "a", "priority": "urgent" },
            { "priority": "low" },
            "not an object",
            { "pattern": "b", "priority": "high" },
            { "pattern": "c", "priority": "unthrottled" },
        ]);
        let filters = PriorityFilters::from_wire(entries.as_array().unwrap());
        assert_eq!(
            filters.to_specs(),
            vec![
                FilterSpec {
                    pattern: "b".to_string(),
                    priority: "high".to_string()
                },
                FilterSpec {
                    pattern: "c".to_string(),
                    priority: "unthrottled".to_string()
                },
            ]
        );
    }
}
