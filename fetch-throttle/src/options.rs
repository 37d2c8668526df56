use anyhow::{Context, Result};
use clap::Parser;
use fetch_throttle_lib::{Destination, FilterSpec, Priority, PriorityFilter, ThrottleConfig};
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use crate::verbosity::Verbosity;

pub(crate) const CONFIG_FILE: &str = "fetch-throttle.toml";
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 20;
pub(crate) const DEFAULT_USER_AGENT: &str = concat!("fetch-throttle/", env!("CARGO_PKG_VERSION"));

const HELP_MSG_CONFIG_FILE: &str = "Configuration file to use

[default: fetch-throttle.toml, if it exists]";

#[allow(clippy::unnecessary_wraps)]
fn parse_destination(value: &str) -> Result<Destination, Infallible> {
    Ok(Destination::from(value))
}

/// fetch-throttle downloads a list of URLs while limiting how many
/// downloads run at the same time. Waiting downloads are admitted by
/// priority: high, then normal, then low. Unthrottled downloads never wait.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct FetchOptions {
    /// URLs to download
    #[arg(name = "urls", required = true)]
    pub(crate) urls: Vec<String>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

/// Command line settings; unset ones are taken from the configuration file
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    pub(crate) verbose: Verbosity,

    /// Maximum number of concurrent throttled downloads; 0 disables throttling
    ///
    /// [default: 4]
    #[arg(short, long, env = "FETCH_THROTTLE_MAX_DOWNLOADS")]
    pub(crate) max_downloads: Option<usize>,

    /// Priority filter in the form `PATTERN=PRIORITY`; may be given multiple
    /// times. Command line filters are tried before those of the
    /// configuration file.
    #[arg(short = 'f', long = "filter", value_name = "PATTERN=PRIORITY")]
    pub(crate) filters: Vec<PriorityFilter>,

    /// Destination of the downloads, sent as `Sec-Fetch-Dest`, e.g. `script`,
    /// `style`, `image` or `document`
    #[arg(short, long, value_parser = parse_destination, default_value = "")]
    pub(crate) destination: Destination,

    /// Priority of the downloads, overriding filters and destination:
    /// `high`, `normal`, `low` or `unthrottled`
    #[arg(short, long, value_parser = Priority::parse)]
    pub(crate) priority: Option<Priority>,

    /// How long busy/idle transitions are collected before being reported,
    /// e.g. `50ms`
    ///
    /// [default: 50ms]
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) busy_window: Option<Duration>,

    /// Log every admission decision
    #[arg(long)]
    pub(crate) debug: bool,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub(crate) timeout: u64,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    pub(crate) user_agent: String,
}

impl Config {
    /// Combine the configuration file with the command line; the command
    /// line wins.
    pub(crate) fn merge(&self, toml: ThrottleConfig) -> ThrottleConfig {
        let mut priority_filters: Vec<FilterSpec> =
            self.filters.iter().map(FilterSpec::from).collect();
        priority_filters.extend(toml.priority_filters);

        ThrottleConfig {
            max_downloads: self.max_downloads.unwrap_or(toml.max_downloads),
            busy_window: self.busy_window.unwrap_or(toml.busy_window),
            debug: self.debug || toml.debug,
            priority_filters,
        }
    }
}

impl FetchOptions {
    /// Load the configuration file, if any, and merge the command line into it
    pub(crate) fn throttle_config(&self) -> Result<ThrottleConfig> {
        let file = match &self.config_file {
            Some(path) => Some(path.clone()),
            None => {
                let default_config = PathBuf::from(CONFIG_FILE);
                default_config.is_file().then_some(default_config)
            }
        };
        let toml = match file {
            Some(path) => ThrottleConfig::load_from_file(&path).with_context(|| {
                format!("Cannot load configuration file `{}`", path.display())
            })?,
            None => ThrottleConfig::default(),
        };

        let config = self.config.merge(toml);
        // Fail early instead of once the worker is running
        config.settings().context("Invalid priority filter")?;
        Ok(config)
    }
}
