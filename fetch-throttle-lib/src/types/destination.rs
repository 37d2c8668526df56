use std::fmt;

use crate::Priority;

/// Semantic type of a fetched resource, as carried by the `Sec-Fetch-Dest`
/// request header.
///
/// The destination is the weakest priority signal: it only decides the
/// priority when neither a priority filter nor an explicit priority header
/// applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Destination {
    /// No destination, e.g. a plain `fetch()` or a request of unknown origin
    #[default]
    Empty,
    /// A classic or module script
    Script,
    /// A stylesheet
    Style,
    /// An image
    Image,
    /// A web font
    Font,
    /// A top-level or nested document
    Document,
    /// Any other destination, stored verbatim
    Other(String),
}

impl Destination {
    /// The priority a download gets when nothing more specific applies.
    #[must_use]
    pub const fn default_priority(&self) -> Priority {
        match self {
            Destination::Script => Priority::High,
            Destination::Style => Priority::Unthrottled,
            Destination::Image | Destination::Empty => Priority::Low,
            Destination::Font | Destination::Document | Destination::Other(_) => Priority::Normal,
        }
    }

    /// The `Sec-Fetch-Dest` spelling of this destination
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Destination::Empty => "",
            Destination::Script => "script",
            Destination::Style => "style",
            Destination::Image => "image",
            Destination::Font => "font",
            Destination::Document => "document",
            Destination::Other(other) => other,
        }
    }

    /// Whether no destination is known
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Destination::Empty)
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        match value.trim() {
            "" | "empty" => Destination::Empty,
            "script" => Destination::Script,
            "style" => Destination::Style,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "document" => Destination::Document,
            other => Destination::Other(other.to_string()),
        }
    }
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        Destination::from(value.as_str())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("script", Priority::High)]
    #[case("image", Priority::Low)]
    #[case("style", Priority::Unthrottled)]
    #[case("", Priority::Low)]
    #[case("empty", Priority::Low)]
    #[case("font", Priority::Normal)]
    #[case("document", Priority::Normal)]
    #[case("audio", Priority::Normal)]
    #[case("worker", Priority::Normal)]
    fn test_default_priority(#[case] destination: &str, #[case] expected: Priority) {
        assert_eq!(Destination::from(destination).default_priority(), expected);
    }

    #[test]
    fn test_other_keeps_its_name() {
        let destination = Destination::from("audioworklet");
        assert_eq!(destination, Destination::Other("audioworklet".to_string()));
        assert_eq!(destination.to_string(), "audioworklet");
        assert!(!destination.is_empty());
        assert!(Destination::default().is_empty());
    }
}
