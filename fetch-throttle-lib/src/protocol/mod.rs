//! Messages exchanged between the throttle manager (client side) and the
//! admission controller (worker side).
//!
//! Messages travel as [`serde_json::Value`]s so that the receiving side can
//! validate them at the boundary. Every message is an object with a
//! `command` discriminator and camelCase fields:
//!
//! | direction | command | fields |
//! |---|---|---|
//! | client → worker | `configure-throttling` | `maxDownloads`, `priorityFilters`, `debug` |
//! | worker → client | `configured-throttling` | `throttling`, `maxDownloads`, `priorityFilters` |
//! | worker → client | `network-busy-status` | `networkBusy` |
mod port;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use port::{Envelope, ReplyPort, WorkerHandle};

use crate::filter::{FilterSpec, PriorityFilters};
use crate::{ErrorKind, Result};

/// Client asks the worker to apply new throttling settings
pub const CONFIGURE_THROTTLING: &str = "configure-throttling";
/// Worker acknowledges applied settings
pub const CONFIGURED_THROTTLING: &str = "configured-throttling";
/// Worker reports a busy/idle transition
pub const NETWORK_BUSY_STATUS: &str = "network-busy-status";

/// Throttling parameters as applied by the admission controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Maximum number of concurrent throttled downloads; 0 disables throttling
    pub max_downloads: usize,
    /// Priority filters in matching order
    pub priority_filters: PriorityFilters,
    /// Log every admission decision
    pub debug: bool,
}

impl ThrottleSettings {
    fn from_message(message: &Value) -> Result<Self> {
        let max_downloads = message
            .get("maxDownloads")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                ErrorKind::malformed(CONFIGURE_THROTTLING, "`maxDownloads` must be an integer")
            })?;
        let filters = message
            .get("priorityFilters")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ErrorKind::malformed(CONFIGURE_THROTTLING, "`priorityFilters` must be an array")
            })?;
        let debug = message
            .get("debug")
            .and_then(Value::as_bool)
            .unwrap_or_default();

        Ok(Self {
            // Negative limits are clamped to "no limit"
            max_downloads: usize::try_from(max_downloads.max(0)).unwrap_or(usize::MAX),
            priority_filters: PriorityFilters::from_wire(filters),
            debug,
        })
    }
}

/// Reply to [`CONFIGURE_THROTTLING`], describing the configuration now in effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    /// Whether downloads are throttled at all (`max_downloads != 0`)
    pub throttling: bool,
    /// The applied concurrency limit
    pub max_downloads: usize,
    /// The filters that survived validation, in matching order
    pub priority_filters: Vec<FilterSpec>,
}

impl From<&ThrottleSettings> for Acknowledgment {
    fn from(settings: &ThrottleSettings) -> Self {
        Self {
            throttling: settings.max_downloads != 0,
            max_downloads: settings.max_downloads,
            priority_filters: settings.priority_filters.to_specs(),
        }
    }
}

/// Messages sent from the client side to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Replace the throttling settings
    ConfigureThrottling(ThrottleSettings),
}

impl ClientMessage {
    /// Validate an inbound message.
    ///
    /// # Errors
    ///
    /// Fails if the `command` field is missing, names an unknown command, or
    /// required fields are missing. Individual invalid priority filters are
    /// not an error; they are dropped.
    pub fn parse(message: &Value) -> Result<Self> {
        match command(message)? {
            CONFIGURE_THROTTLING => {
                ThrottleSettings::from_message(message).map(Self::ConfigureThrottling)
            }
            other => Err(ErrorKind::UnknownCommand(other.to_string())),
        }
    }

    /// Encode for sending
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::ConfigureThrottling(settings) => json!({
                "command": CONFIGURE_THROTTLING,
                "maxDownloads": settings.max_downloads,
                "priorityFilters": settings.priority_filters.to_specs(),
                "debug": settings.debug,
            }),
        }
    }
}

/// Messages sent from the worker to registered clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// The configuration was applied
    ConfiguredThrottling(Acknowledgment),
    /// The worker went from idle to busy or back
    NetworkBusyStatus {
        /// `true` while at least one download is in flight
        #[serde(rename = "networkBusy")]
        network_busy: bool,
    },
}

impl WorkerMessage {
    /// Validate an inbound message.
    ///
    /// # Errors
    ///
    /// Fails if the `command` field is missing or unknown, or if the fields do
    /// not match the command.
    pub fn parse(message: &Value) -> Result<Self> {
        let name = match command(message)? {
            CONFIGURED_THROTTLING => CONFIGURED_THROTTLING,
            NETWORK_BUSY_STATUS => NETWORK_BUSY_STATUS,
            other => return Err(ErrorKind::UnknownCommand(other.to_string())),
        };
        Self::deserialize(message).map_err(|e| ErrorKind::malformed(name, e.to_string()))
    }

    /// Encode for sending
    #[must_use]
    pub fn to_value(&self) -> Value {
        // Serializing a plain enum of plain structs into a `Value` cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn command(message: &Value) -> Result<&str> {
    message
        .get("command")
        .and_then(Value::as_str)
        .ok_or(ErrorKind::MissingCommand)
}
