use crate::enrich::{ArtifactStore, StoreError};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;

/// Supabase Storage publisher. Uploads always set `x-upsert`, so publishing
/// the same object key twice overwrites in place instead of failing.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    base_url: String,
    bucket: String,
    service_key: String,
    http: Client,
}

impl SupabaseStorage {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let bucket = std::env::var("SUPABASE_BUCKET")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "images".to_string());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
            service_key,
            http: build_client(),
        })
    }

    fn upload_url(&self, object_path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, object_path
        )
    }

    fn public_url(&self, object_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object_path
        )
    }
}

#[async_trait]
impl ArtifactStore for SupabaseStorage {
    async fn put_object(&self, object_path: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        let response = self
            .http
            .put(self.upload_url(object_path))
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "image/png")
            .header("x-upsert", "true")
            .header("Cache-Control", "public, max-age=31536000, immutable")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(self.public_url(object_path))
    }
}
