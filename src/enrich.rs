use crate::models::{EnrichedMarket, Market};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upload rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Enrichment text for one market. Mandatory: a failure here fails the item.
#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    async fn generate_description(&self, market: &Market) -> Result<String, GenerateError>;
}

/// Cover image bytes for one market. Best-effort throughout.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, market: &Market) -> Result<Vec<u8>, GenerateError>;
}

/// Durable object storage. Must overwrite idempotently when the same key is
/// published again.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_object(&self, object_path: &str, bytes: Vec<u8>) -> Result<String, StoreError>;
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("description generation failed: {0}")]
    Description(#[source] GenerateError),
}

/// Enriches one market: the description call and the image-generate→publish
/// chain run concurrently and are joined before the result is assembled.
pub struct Enricher {
    describer: Arc<dyn DescriptionGenerator>,
    imager: Arc<dyn ImageGenerator>,
    store: Arc<dyn ArtifactStore>,
}

impl Enricher {
    pub fn new(
        describer: Arc<dyn DescriptionGenerator>,
        imager: Arc<dyn ImageGenerator>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            describer,
            imager,
            store,
        }
    }

    pub async fn enrich(&self, market: &Market) -> Result<EnrichedMarket, EnrichError> {
        let (description, image_url) = tokio::join!(
            self.describer.generate_description(market),
            self.publish_image(market),
        );
        let description = description.map_err(EnrichError::Description)?;
        Ok(EnrichedMarket {
            market: market.clone(),
            description,
            image_url,
        })
    }

    /// Generate and publish the cover image. Every failure on this path is
    /// tolerated: the market still persists, just without an image URL. The
    /// object key is derived from the market id so a retried run overwrites
    /// the same object instead of accumulating copies.
    async fn publish_image(&self, market: &Market) -> Option<String> {
        let bytes = match self.imager.generate_image(market).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    target = "gamma.enrich",
                    market_id = %market.id,
                    error = %err,
                    "image generation failed"
                );
                return None;
            }
        };
        let object_path = format!("{}.png", market.id);
        match self.store.put_object(&object_path, bytes).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(
                    target = "gamma.enrich",
                    market_id = %market.id,
                    error = %err,
                    "image upload failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawMarket;
    use std::sync::Mutex;

    fn market(id: &str) -> Market {
        Market::decode(RawMarket {
            id: id.into(),
            question: format!("Will market {id} resolve yes?"),
            description: "Some resolution criteria.".into(),
            volume: "100000".into(),
            events: vec![],
            outcomes: r#"["Yes","No"]"#.into(),
            outcome_prices: r#"["0.6","0.4"]"#.into(),
        })
        .expect("test market decodes")
    }

    struct FixedDescriber;

    #[async_trait]
    impl DescriptionGenerator for FixedDescriber {
        async fn generate_description(&self, market: &Market) -> Result<String, GenerateError> {
            Ok(format!("blurb for {}", market.id))
        }
    }

    struct FailingDescriber;

    #[async_trait]
    impl DescriptionGenerator for FailingDescriber {
        async fn generate_description(&self, _market: &Market) -> Result<String, GenerateError> {
            Err(GenerateError::Request("model offline".into()))
        }
    }

    struct PngImager;

    #[async_trait]
    impl ImageGenerator for PngImager {
        async fn generate_image(&self, _market: &Market) -> Result<Vec<u8>, GenerateError> {
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
    }

    struct FailingImager;

    #[async_trait]
    impl ImageGenerator for FailingImager {
        async fn generate_image(&self, _market: &Market) -> Result<Vec<u8>, GenerateError> {
            Err(GenerateError::Request("image backend down".into()))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactStore for RecordingStore {
        async fn put_object(
            &self,
            object_path: &str,
            _bytes: Vec<u8>,
        ) -> Result<String, StoreError> {
            self.puts.lock().unwrap().push(object_path.to_string());
            Ok(format!("https://cdn.test/{object_path}"))
        }
    }

    struct RejectingStore;

    #[async_trait]
    impl ArtifactStore for RejectingStore {
        async fn put_object(
            &self,
            _object_path: &str,
            _bytes: Vec<u8>,
        ) -> Result<String, StoreError> {
            Err(StoreError::Rejected {
                status: 503,
                body: "bucket unavailable".into(),
            })
        }
    }

    #[tokio::test]
    async fn enriches_with_generated_description_and_published_image() {
        let store = Arc::new(RecordingStore::default());
        let enricher = Enricher::new(Arc::new(FixedDescriber), Arc::new(PngImager), store.clone());
        let enriched = enricher.enrich(&market("42")).await.expect("item succeeds");
        assert_eq!(enriched.description, "blurb for 42");
        assert_eq!(enriched.image_url.as_deref(), Some("https://cdn.test/42.png"));
        assert_eq!(store.puts.lock().unwrap().as_slice(), ["42.png"]);
    }

    #[tokio::test]
    async fn image_generation_failure_is_best_effort() {
        let store = Arc::new(RecordingStore::default());
        let enricher = Enricher::new(
            Arc::new(FixedDescriber),
            Arc::new(FailingImager),
            store.clone(),
        );
        let enriched = enricher.enrich(&market("42")).await.expect("item succeeds");
        assert!(enriched.image_url.is_none());
        assert!(store.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_best_effort() {
        let enricher = Enricher::new(
            Arc::new(FixedDescriber),
            Arc::new(PngImager),
            Arc::new(RejectingStore),
        );
        let enriched = enricher.enrich(&market("42")).await.expect("item succeeds");
        assert!(enriched.image_url.is_none());
        assert_eq!(enriched.description, "blurb for 42");
    }

    #[tokio::test]
    async fn description_failure_fails_the_item() {
        let enricher = Enricher::new(
            Arc::new(FailingDescriber),
            Arc::new(PngImager),
            Arc::new(RecordingStore::default()),
        );
        let result = enricher.enrich(&market("42")).await;
        assert!(matches!(result, Err(EnrichError::Description(_))));
    }
}
