//! Vendor request construction and the HTTP fetcher
//!
//! The gateway talks to the weather vendor through [`ExternalFetcher`]. The
//! shipped implementation, [`HttpFetcher`], calls the Visual Crossing
//! timeline API with reqwest and returns the response body untouched.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;

use crate::query::{Query, Target};

/// Base URL for the Visual Crossing timeline API
pub const VISUAL_CROSSING_BASE_URL: &str =
    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline/";

/// Request timeout for vendor calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully built vendor request
///
/// `<base><location>[/<start>][/<end>]?key=<API_KEY>[&elements=...]`
#[derive(Clone, PartialEq, Eq)]
pub struct VendorRequest {
    url: Url,
}

impl VendorRequest {
    /// Builds the request for a validated query
    ///
    /// Path segments are percent-encoded; include fields become a
    /// comma-separated `elements` parameter.
    pub fn build(base: &Url, target: &Target<'_>, query: &Query, api_key: &str) -> Self {
        let mut url = base.clone();
        {
            // Only cannot-be-a-base URLs (e.g. `mailto:`) reject path
            // segments; config validation refuses those.
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().push(&target.as_location());
                if let Some(start) = &query.start {
                    segments.push(&start.to_string());
                }
                if let Some(end) = &query.end {
                    segments.push(&end.to_string());
                }
            }
        }
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("key", api_key);
            if !query.include.is_empty() {
                let elements: Vec<&str> = query.include.iter().map(|f| f.as_str()).collect();
                pairs.append_pair("elements", &elements.join(","));
            }
        }
        Self { url }
    }

    /// The full URL, API key included
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The URL with the API key masked, for logs and errors
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "key" { "***".to_string() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

impl fmt::Debug for VendorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorRequest")
            .field("url", &self.redacted())
            .finish()
    }
}

impl fmt::Display for VendorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Failure reported by an [`ExternalFetcher`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The vendor could not be reached or the body could not be read
    #[error("request failed: {0}")]
    Network(String),

    /// The vendor answered with a non-success status
    #[error("vendor returned HTTP {status}")]
    Status { status: u16, body: String },
}

/// Performs the actual vendor call
#[async_trait]
pub trait ExternalFetcher: Send + Sync {
    /// Executes `request` and returns the raw response body on success
    async fn fetch(&self, request: &VendorRequest) -> Result<String, FetchError>;
}

/// Fetcher backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Creates a fetcher with a default client and request timeout
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Creates a fetcher with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExternalFetcher for HttpFetcher {
    async fn fetch(&self, request: &VendorRequest) -> Result<String, FetchError> {
        let response = self
            .client
            .get(request.url().clone())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(FetchError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
