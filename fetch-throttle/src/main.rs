//! `fetch-throttle` downloads a list of URLs through a priority-aware
//! admission controller.
//!
//! Download three files, at most two at a time, with JSON files last:
//! ```sh
//! fetch-throttle -m 2 -f '\.json$=low' https://example.com/a.json https://example.com/b.js https://example.com/c.css
//! ```
//!
//! Settings can also come from a `fetch-throttle.toml` file:
//! ```toml
//! max_downloads = 2
//! busy_window = "50ms"
//!
//! [[priority_filters]]
//! pattern = '\.json$'
//! priority = "low"
//! ```
//!
//! For every URL one line `<status> <url>` is printed, in the order the URLs
//! were given.
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]

use anyhow::{Result, bail};
use fetch_throttle_lib::{
    AdmissionController, DESTINATION_HEADER, PRIORITY_HEADER, ThrottleConfig, ThrottleManager,
    ThrottledClient,
};
use futures::future::join_all;
use log::{debug, error, info};
use reqwest::StatusCode;

mod client;
mod logging;
mod options;
mod verbosity;

use crate::logging::init_logging;
use crate::options::{Config, FetchOptions};
use clap::Parser;

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    DownloadFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Parse the command line and merge a potential config file into it
fn load_config() -> Result<(FetchOptions, ThrottleConfig)> {
    let opts = FetchOptions::parse();
    init_logging(&opts.config.verbose);
    let config = opts.throttle_config()?;
    Ok((opts, config))
}

/// Set up runtime and download
fn run_main() -> Result<i32> {
    let (opts, config) = match load_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Error while loading config: {e:#}");
            return Ok(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&opts, &config))
}

/// The outcome of one download
#[derive(Debug)]
enum Outcome {
    Status(StatusCode),
    Failed(reqwest::Error),
}

async fn run(opts: &FetchOptions, config: &ThrottleConfig) -> Result<i32> {
    let controller = AdmissionController::new(config.busy_window);
    let manager = ThrottleManager::from_config(config, Some(controller.serve()))?;

    let mut network = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = network.recv().await {
            info!("Network {event}");
        }
    });

    if !manager.configure().await {
        bail!("The admission controller did not acknowledge its configuration");
    }

    let client = client::create(&opts.config, controller.clone())?;
    let outcomes = join_all(
        opts.urls
            .iter()
            .map(|url| download(&client, &opts.config, url)),
    )
    .await;

    let mut failed = false;
    for (url, outcome) in opts.urls.iter().zip(outcomes) {
        match outcome {
            Outcome::Status(status) => {
                println!("{} {url}", status.as_u16());
                failed |= !status.is_success();
            }
            Outcome::Failed(e) => {
                println!("ERR {url}");
                error!("{url}: {e}");
                failed = true;
            }
        }
    }

    let stats = controller.stats();
    info!(
        "{} downloads, {} had to wait",
        stats.admitted, stats.deferred
    );

    let exit_code = if failed {
        ExitCode::DownloadFailure
    } else {
        ExitCode::Success
    };
    Ok(exit_code as i32)
}

/// Download `url` completely, holding a slot until the body is read
async fn download(client: &ThrottledClient, cfg: &Config, url: &str) -> Outcome {
    let mut request = client.inner().get(url);
    if !cfg.destination.is_empty() {
        request = request.header(DESTINATION_HEADER, cfg.destination.as_str());
    }
    if let Some(priority) = cfg.priority {
        request = request.header(PRIORITY_HEADER, priority.as_str());
    }
    let request = match request.build() {
        Ok(request) => request,
        Err(e) => return Outcome::Failed(e),
    };

    let result = client
        .execute_with(request, |response| async move {
            let status = response.status();
            let body = response.bytes().await?;
            debug!("Read {} bytes from {url}", body.len());
            Ok::<_, reqwest::Error>(status)
        })
        .await;
    match result {
        Ok(status) => Outcome::Status(status),
        Err(e) => Outcome::Failed(e),
    }
}
