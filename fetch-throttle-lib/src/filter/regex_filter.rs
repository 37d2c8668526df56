use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{ErrorKind, Priority, Result};

/// A URL pattern that assigns a priority to every matching download.
///
/// Patterns are unanchored: they match if they occur anywhere in the URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "FilterSpec", into = "FilterSpec")]
pub struct PriorityFilter {
    regex: Regex,
    priority: Priority,
}

impl PriorityFilter {
    /// Compile a filter from a pattern and a priority.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPattern`] if `pattern` is not a valid
    /// regular expression.
    pub fn new(pattern: &str, priority: Priority) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| ErrorKind::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex, priority })
    }

    /// Compile a filter from its string form, as received over the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the priority name is unknown or the pattern does
    /// not compile.
    pub fn parse(pattern: &str, priority: &str) -> Result<Self> {
        Self::new(pattern, Priority::parse(priority)?)
    }

    #[inline]
    #[must_use]
    /// Returns `true` if the pattern occurs in the given URL
    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    /// The source of the pattern
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// The priority assigned to matching downloads
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }
}

impl PartialEq for PriorityFilter {
    fn eq(&self, other: &Self) -> bool {
        // Workaround, see https://github.com/rust-lang/regex/issues/364
        self.pattern() == other.pattern() && self.priority == other.priority
    }
}

impl Eq for PriorityFilter {}

/// Parses `PATTERN=PRIORITY`, splitting at the last `=`
impl FromStr for PriorityFilter {
    type Err = ErrorKind;

    fn from_str(spec: &str) -> Result<Self> {
        let (pattern, priority) = spec
            .rsplit_once('=')
            .ok_or_else(|| ErrorKind::InvalidFilterSpec(spec.to_string()))?;
        Self::parse(pattern, priority.trim())
    }
}

/// The uncompiled form of a [`PriorityFilter`], as it appears in messages
/// and configuration files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Regular expression matched against the download URL
    pub pattern: String,
    /// One of `high`, `normal`, `low`, `unthrottled`
    pub priority: String,
}

impl TryFrom<FilterSpec> for PriorityFilter {
    type Error = ErrorKind;

    fn try_from(spec: FilterSpec) -> Result<Self> {
        Self::parse(&spec.pattern, &spec.priority)
    }
}

impl From<PriorityFilter> for FilterSpec {
    fn from(filter: PriorityFilter) -> Self {
        FilterSpec::from(&filter)
    }
}

impl From<&PriorityFilter> for FilterSpec {
    fn from(filter: &PriorityFilter) -> Self {
        Self {
            pattern: filter.pattern().to_string(),
            priority: filter.priority.to_string(),
        }
    }
}
