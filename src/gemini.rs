use crate::config::ConfigError;
use crate::enrich::{DescriptionGenerator, GenerateError, ImageGenerator};
use crate::http::build_client;
use crate::models::Market;
use crate::prompts::PromptSet;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub description_model: String,
    pub image_model: String,
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;
        Ok(Self {
            api_key,
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            description_model: std::env::var("GEMINI_DESCRIPTION_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash-lite".into()),
            image_model: std::env::var("GEMINI_IMAGE_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash-image".into()),
        })
    }
}

/// Client for the Gemini `generateContent` endpoint, serving both the text
/// and the image generation paths.
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
    prompts: Arc<PromptSet>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig, prompts: Arc<PromptSet>) -> Self {
        Self {
            http: build_client(),
            config,
            prompts,
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GenerateError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| GenerateError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GenerateError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| GenerateError::InvalidResponse(err.to_string()))
    }

    /// Single-turn text completion under a system instruction, on the text
    /// model. Also used by the video backfill's query planning.
    pub(crate) async fn complete_text(
        &self,
        system: &str,
        user: &str,
    ) -> Result<String, GenerateError> {
        let request = GenerateContentRequest {
            contents: vec![Content::user_text(user)],
            system_instruction: Some(Content::text(system)),
        };
        let response = self.generate(&self.config.description_model, &request).await?;
        first_text(&response)
            .ok_or_else(|| GenerateError::InvalidResponse("no text returned".into()))
    }
}

#[async_trait]
impl DescriptionGenerator for GeminiClient {
    async fn generate_description(&self, market: &Market) -> Result<String, GenerateError> {
        self.complete_text(self.prompts.description_system(), &market.description)
            .await
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, market: &Market) -> Result<Vec<u8>, GenerateError> {
        let mut contents = vec![Content::user_text(&self.prompts.image_prompt(market))];
        if let Some(reference) = self.prompts.style_reference() {
            contents.push(Content::user_image("image/png", reference));
        }
        let request = GenerateContentRequest {
            contents,
            system_instruction: None,
        };
        let response = self.generate(&self.config.image_model, &request).await?;
        let inline = first_inline_data(&response)
            .ok_or_else(|| GenerateError::InvalidResponse("no image returned".into()))?;
        BASE64
            .decode(inline.data.as_bytes())
            .map_err(|err| GenerateError::InvalidResponse(format!("image payload is not base64: {err}")))
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }
    }

    fn user_text(text: &str) -> Self {
        Self {
            role: Some("user".into()),
            ..Self::text(text)
        }
    }

    fn user_image(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            role: Some("user".into()),
            parts: vec![Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: mime_type.to_string(),
                    data: BASE64.encode(bytes),
                }),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn first_text(response: &GenerateContentResponse) -> Option<String> {
    response
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .find_map(|part| part.text.clone())
}

fn first_inline_data(response: &GenerateContentResponse) -> Option<&InlineData> {
    response
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .find_map(|part| part.inline_data.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_text_part() {
        let payload = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "A concise blurb."}]}}
            ]
        }"#;
        let response: GenerateContentResponse =
            serde_json::from_str(payload).expect("payload parses");
        assert_eq!(first_text(&response).as_deref(), Some("A concise blurb."));
        assert!(first_inline_data(&response).is_none());
    }

    #[test]
    fn extracts_inline_image_past_leading_text() {
        let payload = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [
                    {"text": "Here is the image:"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                ]}}
            ]
        }"#;
        let response: GenerateContentResponse =
            serde_json::from_str(payload).expect("payload parses");
        let inline = first_inline_data(&response).expect("inline data present");
        assert_eq!(inline.mime_type, "image/png");
        let bytes = BASE64.decode(inline.data.as_bytes()).expect("valid base64");
        assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4e, 0x47]);
    }

    #[test]
    fn empty_candidates_yield_nothing() {
        let response: GenerateContentResponse =
            serde_json::from_str("{}").expect("payload parses");
        assert!(first_text(&response).is_none());
    }

    #[test]
    fn request_serialises_camel_case_fields() {
        let request = GenerateContentRequest {
            contents: vec![Content::user_text("hello")],
            system_instruction: Some(Content::text("be brief")),
        };
        let value = serde_json::to_value(&request).expect("request serialises");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(value["contents"][0]["role"], "user");
        assert!(value["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn image_reference_is_base64_inline_data() {
        let content = Content::user_image("image/png", &[1, 2, 3]);
        let value = serde_json::to_value(&content).expect("content serialises");
        assert_eq!(value["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(value["parts"][0]["inlineData"]["data"], "AQID");
    }
}
