use crate::ai::error::AiError;
use crate::config::GeminiConfig;
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// A generative model that turns one row prompt into text.
#[async_trait]
pub trait GenerativeModelPort: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> std::result::Result<String, AiError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<&'a Content>,
    pub contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, trimmed. Empty output counts as a failure.
    pub fn into_text(self) -> std::result::Result<String, AiError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let candidate = self.candidates.into_iter().next();
        let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());

        let text = candidate
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let text = text.trim();

        if text.is_empty() {
            let reason = block_reason
                .map(|r| format!("prompt blocked: {}", r))
                .or_else(|| finish_reason.map(|r| format!("finish reason: {}", r)))
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(AiError::Parse(format!("empty response ({})", reason)));
        }
        Ok(text.to_string())
    }
}

/// Gemini `generateContent` client. The system instruction is built once and
/// reused for every row.
pub struct GeminiClient {
    http_client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    system_instruction: Option<Content>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, config: &GeminiConfig) -> Result<Self> {
        let model = config
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| EtlError::Config("gemini.model is not set".into()))?;
        let model = model.trim_start_matches("models/").to_string();

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let endpoint = format!(
            "{}/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            model
        );

        let system_instruction = if config.system_instruction.trim().is_empty() {
            None
        } else {
            Some(Content::text(None, &config.system_instruction))
        };

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            endpoint,
            model,
            system_instruction,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn build_request<'a>(&'a self, prompt: &str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            system_instruction: self.system_instruction.as_ref(),
            contents: vec![Content::text(Some("user"), prompt)],
        }
    }
}

#[async_trait]
impl GenerativeModelPort for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> std::result::Result<String, AiError> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Gemini request failed");
                AiError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message: String = error_text.chars().take(500).collect();
            warn!(status = %status, error = %message, "Gemini API error");
            if status.as_u16() == 429 {
                return Err(AiError::RateLimited(message));
            }
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Gemini generateContent"
        );

        body.into_text()
    }
}
