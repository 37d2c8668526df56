use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::filter::{FilterSpec, PriorityFilter, PriorityFilters};
use crate::protocol::ThrottleSettings;
use crate::{ErrorKind, Result};

/// Number of concurrent throttled downloads a client asks for unless told
/// otherwise
pub const DEFAULT_MAX_DOWNLOADS: usize = 4;

/// Default window over which busy/idle transitions are coalesced
pub const DEFAULT_BUSY_WINDOW: Duration = Duration::from_millis(50);

/// Throttling configuration, usually read from a TOML file:
///
/// ```toml
/// max_downloads = 4
/// busy_window = "50ms"
/// debug = false
///
/// [[priority_filters]]
/// pattern = '\.json$'
/// priority = "low"
/// ```
///
/// Unlike filters received in a message, an invalid filter in the
/// configuration is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Maximum number of concurrent throttled downloads; 0 disables throttling
    #[serde(default = "default_max_downloads")]
    pub max_downloads: usize,

    /// How long busy/idle transitions are collected before being broadcast
    #[serde(default = "default_busy_window", with = "humantime_serde")]
    pub busy_window: Duration,

    /// Log every admission decision
    #[serde(default)]
    pub debug: bool,

    /// Priority filters, tried in order after the built-in one
    #[serde(default)]
    pub priority_filters: Vec<FilterSpec>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_downloads: default_max_downloads(),
            busy_window: default_busy_window(),
            debug: false,
            priority_filters: Vec::new(),
        }
    }
}

/// Default number of concurrent downloads
const fn default_max_downloads() -> usize {
    DEFAULT_MAX_DOWNLOADS
}

/// Default coalescing window
const fn default_busy_window() -> Duration {
    DEFAULT_BUSY_WINDOW
}

impl ThrottleConfig {
    /// Load a configuration file
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid configuration
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ErrorKind::ReadConfig(path.to_path_buf(), e))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Compile the configured priority filters, in order
    ///
    /// # Errors
    ///
    /// Fails on the first filter with an unknown priority or a pattern that
    /// does not compile
    pub fn priority_filters(&self) -> Result<Vec<PriorityFilter>> {
        self.priority_filters
            .iter()
            .cloned()
            .map(PriorityFilter::try_from)
            .collect()
    }

    /// The settings a client sends for this configuration: the built-in
    /// filter comes first.
    ///
    /// # Errors
    ///
    /// Fails if a configured filter is invalid
    pub fn settings(&self) -> Result<ThrottleSettings> {
        Ok(ThrottleSettings {
            max_downloads: self.max_downloads,
            priority_filters: PriorityFilters::with_builtin(self.priority_filters()?),
            debug: self.debug,
        })
    }
}
