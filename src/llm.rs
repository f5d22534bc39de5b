//! Chat-model providers.
//!
//! The OpenAI provider sends the rendered prompt as a single user message to
//! `POST /chat/completions` with the configured temperature and seed, and
//! returns `choices[0].message.content`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use clausewatch_core::llm::ChatModel;

use crate::config::LlmConfig;
use crate::openai::OpenAiClient;

pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("The chat model is disabled. Set [llm] provider = \"openai\" and a model to run analyses.")
    }
}

pub struct OpenAiChatModel {
    client: OpenAiClient,
    model: String,
    temperature: f32,
    seed: Option<i64>,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for OpenAI provider"))?;
        let client = OpenAiClient::from_env(&config.base_url, config.timeout_secs, config.max_retries)?;
        Ok(Self {
            client,
            model,
            temperature: config.temperature,
            seed: config.seed,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(seed) = self.seed {
            body["seed"] = serde_json::json!(seed);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let json = self
            .client
            .post_json("chat/completions", &self.request_body(prompt))
            .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChatModel)),
        "openai" => Ok(Box::new(OpenAiChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
