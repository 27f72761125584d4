//! Thin client for the AI extraction relay.
//!
//! The core only ever sees one callable: a prompt (plus an optional inlined
//! document image) goes in, free text comes out. Everything else - model
//! selection, auth, quota - lives behind this boundary, and callers must
//! tolerate the text not being valid JSON.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{CoreError, Result};

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const TEXT_MODEL: &str = "openai/gpt-4o-mini";
const VISION_MODEL: &str = "openai/gpt-4.1-mini";

/// Base64-encoded document bytes attached to a gateway invocation.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: String,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        Self {
            data: STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// The relay contract as the workflow sees it: one call, one text response.
#[async_trait]
pub trait ExtractionGateway: Send + Sync {
    async fn invoke(&self, prompt: &str, image: Option<&ImagePayload>) -> Result<String>;
}

/// OpenRouter-backed gateway. Picks a vision-capable model path when an
/// image is attached and a text-only path otherwise.
pub struct OpenRouterGateway {
    client: Client,
    api_key: String,
    text_model: String,
    vision_model: String,
}

impl OpenRouterGateway {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            text_model: std::env::var("TEXT_MODEL").unwrap_or_else(|_| TEXT_MODEL.to_string()),
            vision_model: std::env::var("VISION_MODEL")
                .unwrap_or_else(|_| VISION_MODEL.to_string()),
        }
    }
}

#[async_trait]
impl ExtractionGateway for OpenRouterGateway {
    async fn invoke(&self, prompt: &str, image: Option<&ImagePayload>) -> Result<String> {
        let mut content = vec![json!({
            "type": "text",
            "text": prompt,
        })];

        let model = match image {
            Some(img) => {
                content.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", img.mime_type, img.data)
                    }
                }));
                &self.vision_model
            }
            None => &self.text_model,
        };

        debug!(model = %model, with_image = image.is_some(), "invoking extraction gateway");

        let payload = json!({
            "model": model,
            "messages": [
                {
                    "role": "user",
                    "content": content
                }
            ],
            "max_tokens": 4000
        });

        let response = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CoreError::Gateway(format!(
                "gateway request failed: {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CoreError::Gateway("malformed gateway response".to_string()))?;

        Ok(text.to_string())
    }
}

/// Strip ```json fences the model likes to wrap structured output in.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences() {
        let raw = "```json\n{\"isValid\": true}\n```";
        assert_eq!(strip_code_fences(raw), "{\"isValid\": true}");
    }

    #[test]
    fn strips_bare_fences() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn leaves_plain_json_untouched() {
        let raw = "  {\"a\": 1}  ";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }
}
