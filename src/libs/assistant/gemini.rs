use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::libs::assistant::{AiService, Citation, Completion, CompletionRequest, GeneratedImage};
use crate::libs::core::error::AiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeminiSettings {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub http_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
struct WebSource {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

/// `generateContent` client for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    settings: GeminiSettings,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Result<Self, AiError> {
        let http = Client::builder().timeout(settings.http_timeout).build()?;
        Ok(Self { http, settings })
    }

    async fn generate(&self, model: &str, body: &Value) -> Result<GenerateContentResponse, AiError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.settings.base_url,
            model,
            urlencoding::encode(&self.settings.api_key)
        );
        debug!(model, "generateContent");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| AiError::Parse(format!("Failed to parse response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AiError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            })
        }
    }
}

#[async_trait]
impl AiService for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AiError> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });
        if let Some(instruction) = &request.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
        }
        if request.grounded {
            body["tools"] = json!([{ "googleSearch": {} }]);
        }

        let response = self.generate(&self.settings.text_model, &body).await?;
        completion_from_response(response)
    }

    async fn generate_image(&self, prompt: &str) -> Result<Option<GeneratedImage>, AiError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "imageConfig": { "aspectRatio": "1:1" } },
        });
        let response = self.generate(&self.settings.image_model, &body).await?;
        image_from_response(response)
    }
}

fn completion_from_response(response: GenerateContentResponse) -> Result<Completion, AiError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AiError::Parse("response has no candidates".to_string()))?;

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AiError::Parse("response has no text".to_string()));
    }

    let citations = candidate
        .grounding_metadata
        .map(|metadata| {
            metadata
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter_map(|web| match (web.title, web.uri) {
                    (Some(title), Some(uri)) if !title.is_empty() && !uri.is_empty() => {
                        Some(Citation { title, uri })
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Completion { text, citations })
}

fn image_from_response(response: GenerateContentResponse) -> Result<Option<GeneratedImage>, AiError> {
    let inline = response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .find_map(|part| part.inline_data);

    let Some(inline) = inline else {
        warn!("image response carried no inline image");
        return Ok(None);
    };
    let bytes = STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| AiError::Parse(format!("invalid inline image data: {}", e)))?;

    Ok(Some(GeneratedImage {
        mime_type: inline.mime_type,
        bytes,
    }))
}

// `{"error": {"code": 400, "message": "...", "status": "INVALID_ARGUMENT"}}`
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
