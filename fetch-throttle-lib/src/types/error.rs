use std::path::PathBuf;
use thiserror::Error;

/// Possible errors when configuring or talking to the admission controller.
///
/// Failures of the throttled downloads themselves never show up here; they
/// are handed back to the caller unchanged.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The given string is not one of `high`, `normal`, `low` or `unthrottled`
    #[error("Invalid priority `{0}`, expected one of high, normal, low, unthrottled")]
    InvalidPriority(String),

    /// A priority filter pattern is not a valid regular expression
    #[error("Invalid priority filter pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Reason reported by the regex compiler
        #[source]
        source: regex::Error,
    },

    /// A priority filter given on the command line is not `PATTERN=PRIORITY`
    #[error("Invalid priority filter `{0}`, expected `PATTERN=PRIORITY`")]
    InvalidFilterSpec(String),

    /// An inbound message carries no string `command` field
    #[error("Message has no `command` field")]
    MissingCommand,

    /// An inbound message names a command this side does not understand
    #[error("Unknown command `{0}`")]
    UnknownCommand(String),

    /// A known command is missing required fields or has fields of the wrong type
    #[error("Malformed `{command}` message: {reason}")]
    MalformedMessage {
        /// The command of the rejected message
        command: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The configuration file could not be read
    #[error("Failed to read configuration file `{}`: {}", .0.display(), .1)]
    ReadConfig(PathBuf, #[source] std::io::Error),

    /// The configuration file is not valid TOML or has unknown keys
    #[error("Failed to parse configuration: {0}")]
    ParseConfig(#[from] toml::de::Error),
}

impl ErrorKind {
    pub(crate) fn malformed(command: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            command,
            reason: reason.into(),
        }
    }
}
