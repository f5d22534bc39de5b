//! Minimal OpenAI-compatible HTTP client shared by the embedding and chat
//! providers.
//!
//! Requests are retried with exponential backoff (1s, 2s, 4s, ... capped at
//! 32s) on HTTP 429, 5xx, and transport errors. Other 4xx responses fail
//! immediately.
//!
//! The API key is only required once a request is sent, so commands that
//! never reach a provider work without `OPENAI_API_KEY`.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    max_retries: u32,
}

impl OpenAiClient {
    /// Build a client with the key from `OPENAI_API_KEY`, if set.
    pub fn from_env(base_url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(api_key, base_url, timeout_secs, max_retries)
    }

    pub fn new(api_key: Option<String>, base_url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    /// POST `body` to `{base_url}/{path}` and return the parsed JSON reply.
    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY not set"))?;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, delay_secs = delay.as_secs(), %url, "retrying OpenAI request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        if let Some(error) = json.get("error") {
                            bail!("OpenAI API returned error: {}", error);
                        }
                        return Ok(json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("OpenAI request failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_fails_on_first_request() {
        let client = OpenAiClient::new(None, "http://127.0.0.1:9", 1, 0).unwrap();
        let err = client
            .post_json("embeddings", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "OPENAI_API_KEY not set");
    }
}
