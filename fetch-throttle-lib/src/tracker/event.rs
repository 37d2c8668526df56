use std::fmt;

use crate::Priority;

/// Observable lifecycle of intercepted downloads.
///
/// Events are emitted in the order the controller takes its decisions, so
/// the sequence of `Started` events is the admission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// The download hit the concurrency limit and waits in a queue
    Queued {
        /// URL of the download
        url: String,
        /// Resolved priority
        priority: Priority,
    },
    /// The download was admitted and its fetch is about to run
    Started {
        /// URL of the download
        url: String,
        /// Resolved priority
        priority: Priority,
    },
    /// The fetch finished, successfully or not
    Completed {
        /// URL of the download
        url: String,
        /// Resolved priority
        priority: Priority,
    },
    /// A busy (`true`) or idle (`false`) broadcast went out
    BusyChanged(bool),
}

impl TrackerEvent {
    /// URL of the download this event is about, if any
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Queued { url, .. } | Self::Started { url, .. } | Self::Completed { url, .. } => {
                Some(url)
            }
            Self::BusyChanged(_) => None,
        }
    }
}

impl fmt::Display for TrackerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued { url, priority } => write!(f, "queued {url} [{priority}]"),
            Self::Started { url, priority } => write!(f, "started {url} [{priority}]"),
            Self::Completed { url, priority } => write!(f, "completed {url} [{priority}]"),
            Self::BusyChanged(true) => f.write_str("network busy"),
            Self::BusyChanged(false) => f.write_str("network idle"),
        }
    }
}
