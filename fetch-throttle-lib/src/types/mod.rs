#![allow(unreachable_pub)]

mod destination;
mod error;
mod priority;
mod request;

pub use destination::Destination;
pub use error::ErrorKind;
pub use priority::Priority;
pub use request::DownloadRequest;

/// The fetch-throttle `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
