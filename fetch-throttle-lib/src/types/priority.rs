use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{ErrorKind, Result};

/// Scheduling class of a download.
///
/// Throttled downloads wait in one FIFO queue per class and are admitted
/// strictly in the order `High`, `Normal`, `Low`. `Unthrottled` downloads
/// never wait.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    /// Admitted before anything else
    High,
    /// Admitted after all pending high priority downloads
    Normal,
    /// Admitted last
    Low,
    /// Exempt from the concurrency budget
    Unthrottled,
}

impl Priority {
    /// Throttled priorities in admission order.
    pub const THROTTLED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Parse a priority name as it appears on the wire or in a header.
    ///
    /// Names are case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPriority`] for anything but the four
    /// lowercase priority names.
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_str(name).map_err(|_| ErrorKind::InvalidPriority(name.to_string()))
    }

    /// Whether downloads of this priority count against the budget and may queue
    #[must_use]
    pub const fn is_throttled(self) -> bool {
        !matches!(self, Priority::Unthrottled)
    }

    /// The name used on the wire
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("high", Priority::High)]
    #[case("normal", Priority::Normal)]
    #[case("low", Priority::Low)]
    #[case("unthrottled", Priority::Unthrottled)]
    fn test_parse(#[case] input: &str, #[case] expected: Priority) {
        assert_eq!(Priority::parse(input).unwrap(), expected);
        assert_eq!(expected.to_string(), input);
        assert_eq!(expected.as_str(), input);
    }

    #[rstest]
    #[case("")]
    #[case("HIGH")]
    #[case("urgent")]
    #[case(" low")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(matches!(
            Priority::parse(input),
            Err(ErrorKind::InvalidPriority(name)) if name == input
        ));
    }

    #[test]
    fn test_only_unthrottled_bypasses_budget() {
        for priority in Priority::THROTTLED {
            assert!(priority.is_throttled());
        }
        assert!(!Priority::Unthrottled.is_throttled());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Priority::Unthrottled).unwrap();
        assert_eq!(json, r#""unthrottled""#);
        let priority: Priority = serde_json::from_str(r#""low""#).unwrap();
        assert_eq!(priority, Priority::Low);
    }
}
