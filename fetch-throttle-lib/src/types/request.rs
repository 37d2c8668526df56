use std::fmt::Display;

use typed_builder::TypedBuilder;

use crate::{Destination, Priority, filter::PriorityFilters, filter::resolve_priority};

/// Everything the admission controller needs to know about a download.
///
/// ```
/// use fetch_throttle_lib::{Destination, DownloadRequest};
///
/// let request = DownloadRequest::builder()
///     .url("https://example.com/app.js")
///     .destination(Destination::Script)
///     .priority_header("low")
///     .build();
/// assert_eq!(request.priority_header(), Some("low"));
/// ```
#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Full URL, matched against priority filters and used for logging
    #[builder(setter(into))]
    url: String,

    /// Semantic destination of the download
    #[builder(default, setter(into))]
    destination: Destination,

    /// Raw value of the priority override header, if the request carried one
    #[builder(default, setter(into, strip_option(fallback = priority_header_opt)))]
    priority_header: Option<String>,
}

impl DownloadRequest {
    /// A request without destination or override header
    pub fn new(url: impl Into<String>) -> Self {
        Self::builder().url(url).build()
    }

    /// The URL of the download
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The destination of the download
    #[must_use]
    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The override header value, if any
    #[must_use]
    pub fn priority_header(&self) -> Option<&str> {
        self.priority_header.as_deref()
    }

    /// Resolve the priority of this download against the given filters
    #[must_use]
    pub fn priority(&self, filters: &PriorityFilters) -> Priority {
        resolve_priority(
            &self.destination,
            &self.url,
            self.priority_header.as_deref(),
            filters,
        )
    }
}

impl Display for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.destination.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{} ({})", self.url, self.destination)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = DownloadRequest::new("https://example.com/");
        assert_eq!(request.url(), "https://example.com/");
        assert_eq!(request.destination(), &Destination::Empty);
        assert_eq!(request.priority_header(), None);
        assert_eq!(request.to_string(), "https://example.com/");
    }

    #[test]
    fn test_priority_uses_destination_default() {
        let request = DownloadRequest::builder()
            .url("https://example.com/logo.png")
            .destination("image")
            .build();
        assert_eq!(request.priority(&PriorityFilters::empty()), Priority::Low);
        assert_eq!(request.to_string(), "https://example.com/logo.png (image)");
    }
}
