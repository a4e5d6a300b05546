//! reqwest-backed [`Transport`] and [`PageSource`].

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, LAST_MODIFIED};
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::contract::{LinkCandidate, PageSource, RemoteStamp, Transfer, Transport};
use crate::error::FetchError;
use crate::links::extract_links;

const USER_AGENT: &str = concat!("web-mirror/", env!("CARGO_PKG_VERSION"));

/// HTTP client used for page listings, metadata requests and transfers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
                transient: false,
            })?;
        Ok(Self { client })
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Response, FetchError> {
        let response = request.send().await.map_err(|e| network_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            error!(url, status = %status, "[FETCH] Remote returned an error status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn network_error(url: &str, e: reqwest::Error) -> FetchError {
    let transient = e.is_timeout() || e.is_connect() || e.is_request() || e.is_body();
    FetchError::Network {
        url: url.to_string(),
        message: e.to_string(),
        transient,
    }
}

/// Read `Content-Length` and `Last-Modified` from response headers.
pub fn stamp_from_headers(headers: &HeaderMap) -> RemoteStamp {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());
    let mtime = headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);
    RemoteStamp { size, mtime }
}

/// Parse an IMF-fixdate such as `Sun, 06 Nov 1994 08:49:37 GMT` into epoch seconds.
pub fn parse_http_date(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

#[async_trait]
impl Transport for HttpClient {
    async fn stat(&self, url: &str) -> Result<RemoteStamp, FetchError> {
        let response = self.send(self.client.head(url), url).await?;
        let stamp = stamp_from_headers(response.headers());
        debug!(url, ?stamp, "[FETCH] HEAD");
        Ok(stamp)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<Transfer, FetchError> {
        let response = self.send(self.client.get(url), url).await?;
        let stamp = stamp_from_headers(response.headers());

        let write_err = |source| FetchError::PartialWrite {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        let mut bytes: i64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| network_error(url, e))?;
            file.write_all(&chunk).await.map_err(write_err)?;
            bytes += chunk.len() as i64;
        }
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        debug!(url, bytes, "[FETCH] GET complete");
        Ok(Transfer { bytes, stamp })
    }
}

#[async_trait]
impl PageSource for HttpClient {
    async fn links(&self, url: &str) -> Result<Vec<LinkCandidate>, FetchError> {
        info!(url, "[FETCH] Fetching page");
        let response = self.send(self.client.get(url), url).await?;
        // Redirects change the base for relative links.
        let base = response.url().to_string();
        let html = response.text().await.map_err(|e| network_error(url, e))?;
        let links = extract_links(&base, &html)?;
        info!(url, links = links.len(), "[FETCH] Page fetched");
        Ok(links)
    }
}
