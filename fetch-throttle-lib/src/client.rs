//! Throttled HTTP downloads on top of [`reqwest`].
use log::trace;
use reqwest::{Client, Request, Response};
use std::future::Future;

use crate::filter::PRIORITY_HEADER;
use crate::{AdmissionController, Destination, DownloadRequest};

/// Request header naming the destination of a download
pub const DESTINATION_HEADER: &str = "sec-fetch-dest";

/// A [`reqwest::Client`] whose requests pass through an
/// [`AdmissionController`].
///
/// The destination is taken from the `Sec-Fetch-Dest` header and the
/// priority override from the `x-fetch-priority` header. The override is
/// for the controller only and is removed before the request goes out.
#[derive(Debug, Clone)]
pub struct ThrottledClient {
    client: Client,
    controller: AdmissionController,
}

impl ThrottledClient {
    /// Wrap `client`, admitting its requests through `controller`
    #[must_use]
    pub const fn new(client: Client, controller: AdmissionController) -> Self {
        Self { client, controller }
    }

    /// The controller requests are admitted through
    #[must_use]
    pub const fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    /// The underlying HTTP client
    #[must_use]
    pub const fn inner(&self) -> &Client {
        &self.client
    }

    /// Describe `request` for the admission controller
    #[must_use]
    pub fn download_request(request: &Request) -> DownloadRequest {
        let headers = request.headers();
        let destination = headers
            .get(DESTINATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(Destination::from)
            .unwrap_or_default();
        let priority_header = headers
            .get(PRIORITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        DownloadRequest::builder()
            .url(request.url().as_str())
            .destination(destination)
            .priority_header_opt(priority_header)
            .build()
    }

    /// Send `request` once the controller admits it.
    ///
    /// The slot is held until the response headers arrive.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying client unchanged
    pub async fn execute(&self, mut request: Request) -> reqwest::Result<Response> {
        let download = Self::download_request(&request);
        if request.headers_mut().remove(PRIORITY_HEADER).is_some() {
            trace!("Removed {PRIORITY_HEADER} from request to {}", request.url());
        }
        self.controller
            .intercept(download, || self.client.execute(request))
            .await
    }

    /// Send `request` once the controller admits it and let `read` consume
    /// the response before the slot is freed.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying client or of `read` unchanged
    pub async fn execute_with<F, Fut, T>(&self, mut request: Request, read: F) -> reqwest::Result<T>
    where
        F: FnOnce(Response) -> Fut,
        Fut: Future<Output = reqwest::Result<T>>,
    {
        let download = Self::download_request(&request);
        request.headers_mut().remove(PRIORITY_HEADER);
        self.controller
            .intercept(download, || async move {
                let response = self.client.execute(request).await?;
                read(response).await
            })
            .await
    }

    /// Send a `GET` request for `url` on behalf of `destination`
    ///
    /// # Errors
    ///
    /// Fails if the URL is invalid or the request fails
    pub async fn get(&self, url: &str, destination: &Destination) -> reqwest::Result<Response> {
        let mut builder = self.client.get(url);
        if !destination.is_empty() {
            builder = builder.header(DESTINATION_HEADER, destination.as_str());
        }
        self.execute(builder.build()?).await
    }
}
