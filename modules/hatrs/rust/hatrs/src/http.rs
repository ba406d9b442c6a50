//! HTTP client for the HAT data API.
//!
//! - Location uploads to `rumpel/locations`
//! - Social feed pages from the Facebook and Twitter plugs, fetched concurrently
//! - Automatic retry with exponential backoff on 429
//! - Renewed auth tokens picked up from the `x-auth-token` response header
//!
//! The async client runs on a tokio runtime owned by [`BlockingHatClient`],
//! which exposes blocking calls for the walker and scheduler threads.

use std::time::{Duration, Instant};

use hatsync::{FeedSource, HatEndpoint, HatError, HatRecord, PageRequest, SyncBlock};
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use crate::social::FeedFetcher;
use crate::walker::LocationUploader;

/// Header carrying the auth token, both ways.
pub const AUTH_HEADER: &str = "x-auth-token";
const API_PREFIX: &str = "/api/v2.6/data";
const LOCATIONS_ENDPOINT: &str = "rumpel/locations";

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;

/// Helper to calculate elapsed milliseconds from an Instant
#[inline]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Wire format of one uploaded location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    /// Unix ms (UTC)
    pub timestamp: i64,
}

impl LocationPayload {
    pub fn from_block(block: &SyncBlock) -> Vec<Self> {
        block
            .samples()
            .iter()
            .map(|s| Self {
                latitude: s.latitude,
                longitude: s.longitude,
                accuracy: s.horizontal_accuracy,
                timestamp: s.captured_at.timestamp_millis(),
            })
            .collect()
    }
}

/// Accepted upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadResponse {
    pub renewed_token: Option<String>,
}

/// One page of plug records.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub records: Vec<HatRecord>,
    pub renewed_token: Option<String>,
}

/// Map a transport error to the message shown in sync feedback.
fn transport_message(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "network timeout".to_string()
    } else if e.is_connect() {
        "network unavailable".to_string()
    } else {
        format!("Request error: {}", e)
    }
}

fn renewed_token(resp: &Response) -> Option<String> {
    resp.headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Backoff before the n-th retry after a 429 (n starts at 1): 500ms, 1s,
/// 2s, then 4s at most.
fn rate_limit_backoff(retry: u32) -> Duration {
    Duration::from_millis(500 * (1 << retry.saturating_sub(1).min(3)))
}

/// Async HAT API client.
pub struct HatClient {
    client: Client,
    endpoint: HatEndpoint,
}

impl HatClient {
    pub fn new(endpoint: HatEndpoint) -> hatsync::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HatError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &HatEndpoint {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}/{}", self.endpoint.base_url(), API_PREFIX, path)
    }

    /// Send a request, retrying on 429. Maps 401 to `AuthExpired` and any
    /// other non-2xx to `UploadFailed`.
    async fn send(
        &self,
        label: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> hatsync::Result<Response> {
        let mut retries = 0;
        let start = Instant::now();

        loop {
            let resp = build().send().await.map_err(|e| {
                warn!(
                    "[HatClient] {} failed after {} ms: {}",
                    label,
                    elapsed_ms(start),
                    e
                );
                HatError::upload(transport_message(&e), None)
            })?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(HatError::upload(
                        "Max retries exceeded (429)",
                        Some(status.as_u16()),
                    ));
                }
                let wait = rate_limit_backoff(retries);
                warn!(
                    "[HatClient] {} got 429, retry {} with {:?} backoff",
                    label, retries, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                warn!("[HatClient] {} rejected: token expired", label);
                return Err(HatError::AuthExpired);
            }
            if !status.is_success() {
                return Err(HatError::upload(
                    format!("HTTP {}", status.as_u16()),
                    Some(status.as_u16()),
                ));
            }

            debug!("[HatClient] {} -> {} ({} ms)", label, status, elapsed_ms(start));
            return Ok(resp);
        }
    }

    /// POST a block of samples. Success is any 2xx.
    pub async fn upload_locations(
        &self,
        token: &str,
        block: &SyncBlock,
    ) -> hatsync::Result<UploadResponse> {
        let url = self.url(LOCATIONS_ENDPOINT);
        let payload = LocationPayload::from_block(block);

        let resp = self
            .send("upload_locations", || {
                self.client
                    .post(&url)
                    .header(AUTH_HEADER, token)
                    .json(&payload)
            })
            .await?;

        info!("[HatClient] Uploaded {} locations", payload.len());
        Ok(UploadResponse {
            renewed_token: renewed_token(&resp),
        })
    }

    /// GET one page of a plug's records.
    pub async fn fetch_feed_page(
        &self,
        token: &str,
        source: FeedSource,
        request: &PageRequest,
    ) -> hatsync::Result<FeedPage> {
        let url = self.url(source.endpoint());
        let query = request.query_params();

        let resp = self
            .send(source.endpoint(), || {
                self.client
                    .get(&url)
                    .header(AUTH_HEADER, token)
                    .query(&query)
            })
            .await
            .map_err(|e| match e {
                HatError::UploadFailed { message, .. } => HatError::feed(message),
                other => other,
            })?;

        let renewed = renewed_token(&resp);
        let records: Vec<HatRecord> = resp
            .json()
            .await
            .map_err(|e| HatError::feed(format!("JSON parse error: {}", e)))?;

        debug!(
            "[HatClient] {:?} page: {} records (limit {})",
            source,
            records.len(),
            request.limit
        );
        Ok(FeedPage {
            records,
            renewed_token: renewed,
        })
    }

    /// Fetch one page per request concurrently.
    pub async fn fetch_feed_pages(
        &self,
        token: &str,
        requests: &[(FeedSource, PageRequest)],
    ) -> Vec<(FeedSource, hatsync::Result<FeedPage>)> {
        let fetches = requests.iter().map(|(source, request)| async move {
            (*source, self.fetch_feed_page(token, *source, request).await)
        });
        futures::future::join_all(fetches).await
    }
}

// ============================================================================
// Blocking Wrapper
// ============================================================================

/// Synchronous facade over [`HatClient`] with its own runtime.
///
/// Must not be called from inside another tokio runtime.
pub struct BlockingHatClient {
    runtime: Runtime,
    inner: HatClient,
}

impl BlockingHatClient {
    pub fn new(endpoint: HatEndpoint) -> hatsync::Result<Self> {
        let runtime_start = Instant::now();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("hatrs-http")
            .enable_all()
            .build()
            .map_err(|e| HatError::config(format!("Runtime error: {}", e)))?;
        debug!(
            "[BlockingHatClient] Created tokio runtime ({} ms)",
            elapsed_ms(runtime_start)
        );

        Ok(Self {
            runtime,
            inner: HatClient::new(endpoint)?,
        })
    }

    pub fn endpoint(&self) -> &HatEndpoint {
        self.inner.endpoint()
    }
}

impl LocationUploader for BlockingHatClient {
    fn upload(&self, token: &str, block: &SyncBlock) -> hatsync::Result<UploadResponse> {
        self.runtime.block_on(self.inner.upload_locations(token, block))
    }
}

impl FeedFetcher for BlockingHatClient {
    fn fetch_pages(
        &self,
        token: &str,
        requests: &[(FeedSource, PageRequest)],
    ) -> Vec<(FeedSource, hatsync::Result<FeedPage>)> {
        self.runtime.block_on(self.inner.fetch_feed_pages(token, requests))
    }
}
