use gate_core::Oracle;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::retry::retry_with_backoff;

/// Chat-completions client against one configurable oracle endpoint
/// (`{base_url}/chat/completions`, OpenAI-compatible request shape).
#[derive(Clone)]
pub struct OracleClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OracleClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    async fn handle_http_response(response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "oracle endpoint returned a non-success status");
            anyhow::bail!("oracle request failed with status {status}: {body}");
        }
        Ok(response.json::<Value>().await?)
    }

    async fn try_send(&self, request: &Value) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let response = Self::handle_http_response(response).await?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("oracle response missing choices[0].message.content"))
    }
}

#[async_trait::async_trait]
impl Oracle for OracleClient {
    async fn ask(
        &self,
        system_prompt: &str,
        user_message: &str,
        model: &str,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        let request = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
        });

        info!(model, "sending request to oracle");

        let base_delays: [u64; 4] = [2, 4, 6, 8];
        let final_retries = 3;
        let content =
            retry_with_backoff(|| self.try_send(&request), &base_delays, final_retries).await?;

        info!("received oracle response");
        Ok(content)
    }
}
