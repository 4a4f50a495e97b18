//! Language model generation
//!
//! Provides:
//! - `Generator` trait used by the query engine
//! - OpenAI-compatible chat completions client
//! - Offline echo generator for local runs

use crate::config::{LlmConfig, SharedConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for answer generation. Implementations must tolerate being
/// called twice for the same query.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Model identifier for logs and metrics
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat completions client.
///
/// Temperature and output length are read from the shared runtime
/// configuration on every call, so admin updates apply immediately.
pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    settings: SharedConfig,
}

impl OpenAIChatGenerator {
    pub fn new(api_key: String, config: &LlmConfig, settings: SharedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let base = config
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            model: config.model.clone(),
            settings,
        })
    }

    async fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let response_config = self.settings.snapshot().await.response;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens: response_config.max_output_tokens,
            temperature: response_config.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationError {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::GenerationError {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::GenerationError {
                message: "Empty response from LLM".to_string(),
            })
    }
}

#[async_trait]
impl Generator for OpenAIChatGenerator {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let start = Instant::now();
        let result = self.call(system_prompt, user_prompt).await;
        metrics::record_generation(start.elapsed().as_secs_f64(), &self.model, result.is_ok());

        if let Err(ref e) = result {
            tracing::warn!(model = %self.model, error = %e, "Generation failed");
        }
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline generator that answers with the leading context it was given
pub struct EchoGenerator {
    max_chars: usize,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self { max_chars: 600 }
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        let excerpt: String = user_prompt.chars().take(self.max_chars).collect();
        Ok(format!("[offline answer]\n{}", excerpt.trim()))
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &LlmConfig, settings: SharedConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIChatGenerator::new(key, config, settings)?))
        }
        "echo" => Ok(Arc::new(EchoGenerator::new())),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider, using offline echo");
            Ok(Arc::new(EchoGenerator::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnterpriseConfig;

    #[tokio::test]
    async fn test_echo_generator_is_repeatable() {
        let generator = EchoGenerator::new();
        let first = generator.generate("system", "Source 1: a.txt").await.unwrap();
        let second = generator.generate("system", "Source 1: a.txt").await.unwrap();
        assert_eq!(first, second);
        assert!(first.contains("a.txt"));
    }

    #[test]
    fn test_openai_requires_key() {
        let settings = SharedConfig::new(EnterpriseConfig::default()).unwrap();
        let config = LlmConfig::default();
        assert!(matches!(
            create_generator(&config, settings),
            Err(AppError::Configuration { .. })
        ));
    }
}
