use crate::http::build_client;
use crate::models::{QuestionRef, QuestionRow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Persistence sink for enriched markets. Upserts must be safe to issue
/// concurrently from independent workers with distinct identifiers.
#[async_trait]
pub trait MarketSink: Send + Sync {
    /// Identifiers already persisted by earlier runs; the coordinator skips
    /// these before any generation work.
    async fn existing_ids(&self) -> Result<HashSet<String>, SinkError>;
    async fn upsert_question(&self, row: &QuestionRow) -> Result<(), SinkError>;
}

/// Row access for the video backfill.
#[async_trait]
pub trait VideoSink: Send + Sync {
    async fn unlinked_questions(&self) -> Result<Vec<QuestionRef>, SinkError>;
    async fn set_video_url(&self, marketid: &str, url: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MarketIdRow {
    marketid: String,
}

#[async_trait]
impl MarketSink for SupabaseClient {
    async fn existing_ids(&self) -> Result<HashSet<String>, SinkError> {
        let response = self
            .authed(self.http.get(self.table_url("questions")))
            .query(&[("select", "marketid")])
            .send()
            .await
            .map_err(|err| SinkError::Request(err.to_string()))?;
        let response = Self::expect_success(response).await?;
        let rows: Vec<MarketIdRow> = response
            .json()
            .await
            .map_err(|err| SinkError::Deserialize(err.to_string()))?;
        Ok(rows.into_iter().map(|row| row.marketid).collect())
    }

    async fn upsert_question(&self, row: &QuestionRow) -> Result<(), SinkError> {
        let response = self
            .authed(self.http.post(self.table_url("questions")))
            .query(&[("on_conflict", "marketid")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await
            .map_err(|err| SinkError::Request(err.to_string()))?;
        Self::expect_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl VideoSink for SupabaseClient {
    async fn unlinked_questions(&self) -> Result<Vec<QuestionRef>, SinkError> {
        let response = self
            .authed(self.http.get(self.table_url("questions")))
            .query(&[("select", "marketid,question"), ("video_url", "is.null")])
            .send()
            .await
            .map_err(|err| SinkError::Request(err.to_string()))?;
        let response = Self::expect_success(response).await?;
        response
            .json()
            .await
            .map_err(|err| SinkError::Deserialize(err.to_string()))
    }

    async fn set_video_url(&self, marketid: &str, url: &str) -> Result<(), SinkError> {
        let response = self
            .authed(self.http.patch(self.table_url("questions")))
            .query(&[("marketid", format!("eq.{marketid}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "video_url": url }))
            .send()
            .await
            .map_err(|err| SinkError::Request(err.to_string()))?;
        Self::expect_success(response).await?;
        Ok(())
    }
}
