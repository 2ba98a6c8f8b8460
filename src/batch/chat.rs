//! [`Annotator`] for OpenAI-compatible chat completion APIs.

use super::{AnnotateError, Annotator};
use crate::config::AnnotatorConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str =
    "Analyse the text extracted from a website and answer the instruction clearly and concisely.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Asks each question through `POST {endpoint}/chat/completions`
pub struct ChatAnnotator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl ChatAnnotator {
    /// Reads the API key from the configured environment variable
    pub fn new(config: &AnnotatorConfig) -> Result<Self, AnnotateError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            ::log::warn!(
                "{} is not set; calling {} without authentication",
                config.api_key_env,
                config.endpoint
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &AnnotatorConfig,
        api_key: Option<String>,
    ) -> Result<Self, AnnotateError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AnnotateError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Annotator for ChatAnnotator {
    async fn answer(&self, text: &str, prompt: &str) -> Result<String, AnnotateError> {
        let user = format!("WEB TEXT:\n{}\n\nINSTRUCTION:\n{}", text, prompt);
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AnnotateError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            ::log::error!("Chat completion returned {}: {}", status, detail);
            return Err(AnnotateError(format!("HTTP {}: {}", status, detail)));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnnotateError(format!("unexpected response: {}", e)))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AnnotateError("response had no answer".to_string()))
    }
}
