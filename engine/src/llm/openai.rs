//! OpenAI-compatible chat provider
//!
//! Talks to any endpoint implementing the OpenAI `v1/chat/completions`
//! contract (including local gateways). Errors are mapped onto the
//! classified `ChatError` kinds so the retry layer can act on them.

use super::{ChatError, ChatProvider, DeltaFn, Message};
use crate::config::LlmConfig;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;

pub struct OpenAiCompatProvider {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn payload(&self, messages: &[Message], stream: bool) -> serde_json::Value {
        let api_messages: Vec<_> = messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();

        json!({
            "model": self.config.model,
            "messages": api_messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        })
    }

    fn map_send_error(e: reqwest::Error) -> ChatError {
        if e.is_timeout() {
            ChatError::Timeout
        } else if e.is_connect() {
            ChatError::Network(e.to_string())
        } else {
            ChatError::Network(e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(ChatError::Auth(text)),
            429 => Err(ChatError::RateLimited),
            s if s >= 500 => Err(ChatError::Server {
                status: s,
                message: text,
            }),
            _ => Err(ChatError::InvalidRequest(text)),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn chat(&self, messages: &[Message]) -> super::Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.payload(messages, false))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_status(response).await?;

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;

        data.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ChatError::Parse("No content in response".to_string()))
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        on_delta: DeltaFn<'_>,
    ) -> super::Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.payload(messages, true))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_status(response).await?;

        let mut full = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ChatError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited "data: {...}" lines
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(full);
                }
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(data) {
                    if let Some(delta) = v
                        .get("choices")
                        .and_then(|c| c.as_array())
                        .and_then(|c| c.first())
                        .and_then(|c| c.get("delta"))
                        .and_then(|d| d.get("content"))
                        .and_then(|c| c.as_str())
                    {
                        full.push_str(delta);
                        on_delta(delta);
                    }
                }
            }
        }

        Ok(full)
    }
}
