use crate::config::AppConfig;
use crate::http::build_client;
use crate::models::RawMarket;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(String),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("invalid feed payload: {0}")]
    Deserialize(String),
    #[error("feed returned no markets")]
    Empty,
}

/// Client for the Gamma markets endpoint. The query selects open markets
/// above the volume floor, so low-volume markets never reach the pipeline.
#[derive(Debug, Clone)]
pub struct GammaFeed {
    http: Client,
    url: String,
    volume_min: u64,
    limit: u32,
}

impl GammaFeed {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: build_client(),
            url: config.feed_url.clone(),
            volume_min: config.feed_volume_min,
            limit: config.feed_limit,
        }
    }

    pub async fn fetch_open_markets(&self) -> Result<Vec<RawMarket>, FeedError> {
        let query = [
            ("closed", "false".to_string()),
            ("volume_num_min", self.volume_min.to_string()),
            ("limit", self.limit.to_string()),
        ];
        let response = self
            .http
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .map_err(|err| FeedError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }
        let markets: Vec<RawMarket> = response
            .json()
            .await
            .map_err(|err| FeedError::Deserialize(err.to_string()))?;
        if markets.is_empty() {
            return Err(FeedError::Empty);
        }
        info!(target = "gamma.feed", count = markets.len(), "fetched open markets");
        Ok(markets)
    }
}
