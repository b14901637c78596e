use std::time::Duration;

use async_trait::async_trait;

use crate::config::mask_api_key;
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{ChatMessage, Completion};

/// Chat-completions client for OpenAI-compatible endpoints (vLLM, SGLang,
/// hosted gateways).
pub struct OpenAiCompatibleProvider {
    id: String,
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: String,
        api_base: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> PhoneClawResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = completions_endpoint(api_base);
        tracing::debug!(
            provider = %id,
            endpoint = %endpoint,
            model = %model,
            api_key = %mask_api_key(&api_key),
            "provider created"
        );
        Ok(Self {
            id,
            endpoint,
            api_key,
            model,
            client,
        })
    }
}

/// Accepts either a base URL (`.../v1`) or the full completions endpoint.
fn completions_endpoint(api_base: &str) -> String {
    let base = api_base.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn has_real_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && !key.eq_ignore_ascii_case("EMPTY")
}

/// Copy of the request body with base64 images elided, for logging.
fn sanitized(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".into());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn api_key_set(&self) -> bool {
        has_real_key(&self.api_key)
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> PhoneClawResult<Completion> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": false,
        });

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            messages = messages.len(),
            max_tokens,
            "sending LLM request"
        );
        tracing::trace!(body = %sanitized(&body), "request body (sanitized, base64 omitted)");

        let mut request = self.client.post(&self.endpoint).json(&body);
        if has_real_key(&self.api_key) {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PhoneClawError::LlmProvider(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let choice = &json["choices"][0];
        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        let finish_reason = choice["finish_reason"].as_str().unwrap_or("").to_string();

        tracing::info!(
            provider = %self.id,
            content_len = text.len(),
            finish_reason = %finish_reason,
            "LLM response received"
        );
        Ok(Completion {
            text,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_accepts_base_or_full_url() {
        assert_eq!(
            completions_endpoint("http://127.0.0.1:8000/v1/"),
            "http://127.0.0.1:8000/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn log_body_omits_images() {
        let msgs = vec![ChatMessage::user_with_image(
            "screen",
            Some("data:image/png;base64,QUJD".into()),
        )];
        let body = serde_json::json!({ "messages": msgs });
        let logged = sanitized(&body);
        assert!(!logged.contains("QUJD"));
        assert!(logged.contains("<omitted_base64_image>"));
    }

    #[test]
    fn empty_placeholder_key_is_not_sent() {
        assert!(!has_real_key("EMPTY"));
        assert!(!has_real_key("  "));
        assert!(has_real_key("sk-abc"));
    }
}
