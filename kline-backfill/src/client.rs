//! Upstream kline REST client.

use crate::{
    config::{BackfillConfig, Resolution},
    error::{BackfillError, ConfigError, FetchError},
    kline::{Kline, RawKline, normalize},
};
use async_trait::async_trait;
use reqwest::Client;
use smol_str::SmolStr;
use std::time::Duration;
use url::Url;

/// Path of the public, unauthenticated Binance spot kline endpoint.
pub const BINANCE_KLINES_PATH: &str = "/api/v3/klines";

const USER_AGENT: &str = concat!("kline-backfill/", env!("CARGO_PKG_VERSION"));

/// One page of klines with `open_time >= start_time`, at most `limit` long.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PageRequest {
    pub symbol: SmolStr,
    pub resolution: Resolution,
    pub start_time: i64,
    pub limit: usize,
}

/// Paginated source of historical klines, ordered oldest to newest.
#[async_trait]
pub trait KlineSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<RawKline>, FetchError>;
}

#[async_trait]
impl<T> KlineSource for std::sync::Arc<T>
where
    T: KlineSource + ?Sized,
{
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<RawKline>, FetchError> {
        (**self).fetch_page(request).await
    }
}

/// [`KlineSource`] backed by the Binance `GET /api/v3/klines` REST endpoint.
#[derive(Debug, Clone)]
pub struct BinanceKlineClient {
    client: Client,
    endpoint: Url,
}

impl BinanceKlineClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackfillError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join(BINANCE_KLINES_PATH))
            .map_err(|error| ConfigError::BaseUrl {
                url: base_url.to_string(),
                reason: error.to_string(),
            })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|error| BackfillError::HttpClient(FetchError::from(error)))?;

        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &BackfillConfig) -> Result<Self, BackfillError> {
        Self::new(&config.base_url, config.request_timeout)
    }

    /// Full request url for a page, including the query string.
    pub fn page_url(&self, request: &PageRequest) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("symbol", &request.symbol)
            .append_pair("interval", request.resolution.as_str())
            .append_pair("startTime", &request.start_time.to_string())
            .append_pair("limit", &request.limit.to_string());
        url
    }
}

#[async_trait]
impl KlineSource for BinanceKlineClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<RawKline>, FetchError> {
        let response = self
            .client
            .get(self.page_url(request))
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(FetchError::from)?;
        serde_json::from_slice::<Vec<RawKline>>(&bytes)
            .map_err(|error| FetchError::Decode(error.to_string()))
    }
}

/// Typed result of a single page fetch.
///
/// `EndOfData` and `Failed` both end a resolution's loop under the default lenient policy; they
/// are kept apart so a stricter policy (and the logs) can tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Page(Vec<Kline>),
    EndOfData,
    Failed(FetchError),
}

/// Fetch and normalise one page.
pub async fn fetch_outcome<Source>(source: &Source, request: &PageRequest) -> PageOutcome
where
    Source: KlineSource + ?Sized,
{
    match source.fetch_page(request).await {
        Ok(page) if page.is_empty() => PageOutcome::EndOfData,
        Ok(page) => PageOutcome::Page(normalize(page)),
        Err(error) => PageOutcome::Failed(error),
    }
}
