//! `fetch-throttle` limits how many downloads run at the same time and
//! decides, by priority, which waiting download goes next.
//!
//! The crate has two halves that only talk through messages:
//!
//! - the worker side, an [`AdmissionController`], intercepts every download,
//!   admits it or parks it in a per-priority queue, and broadcasts when the
//!   network becomes busy or idle;
//! - the client side, a [`ThrottleManager`], holds the parameters the
//!   application wants and sends them to the worker.
//!
//! ```
//! use fetch_throttle_lib::{AdmissionController, Destination, DownloadRequest, ThrottleManager};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let controller = AdmissionController::new(Duration::from_millis(50));
//!     let mut manager = ThrottleManager::new(Some(controller.serve()));
//!     manager.set_max_downloads(Some(2));
//!     assert!(manager.configure().await);
//!
//!     let request = DownloadRequest::builder()
//!         .url("https://example.com/app.js")
//!         .destination(Destination::Script)
//!         .build();
//!     let body = controller.intercept(request, || async { "console.log(1)" }).await;
//!     assert_eq!(body, "console.log(1)");
//! }
//! ```
//!
//! For HTTP downloads, [`ThrottledClient`] wraps a [`reqwest::Client`].

mod client;
mod config;
mod filter;
mod manager;
mod tracker;
mod types;

pub mod protocol;
#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{DESTINATION_HEADER, ThrottledClient};
pub use config::{DEFAULT_BUSY_WINDOW, DEFAULT_MAX_DOWNLOADS, ThrottleConfig};
pub use filter::{FilterSpec, PRIORITY_HEADER, PriorityFilter, PriorityFilters, resolve_priority};
pub use manager::{NetworkEvent, ThrottleManager};
pub use tracker::{AdmissionController, Coalescer, ThrottleStats, TrackerEvent};
pub use types::*;
