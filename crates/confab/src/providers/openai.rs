use anyhow::{anyhow, Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use super::base::{ContentStream, LlmParameters, Provider};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    messages_to_openai_spec, response_lines, tools_to_openai_spec, ToolCallAccumulator,
};
use crate::models::{Content, Message};
use crate::tool::ToolSpec;

pub const OPENAI_HOST: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
    system_prompt: String,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig, system_prompt: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            config,
            system_prompt: system_prompt.to_string(),
        })
    }

    fn request_payload(&self, messages: &[Message], tools: &[ToolSpec], stream: bool) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_to_openai_spec(&self.system_prompt, messages),
            "stream": stream,
        });

        let body = payload.as_object_mut().expect("payload is an object");
        if !tools.is_empty() {
            body.insert("tools".into(), json!(tools_to_openai_spec(tools)));
        }
        apply_openai_parameters(body, &self.config.parameters);

        payload
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        )
    }
}

/// The parameter subset the chat-completions protocol accepts, shared with
/// OpenRouter. Unset parameters are omitted from the payload.
pub(super) fn apply_openai_parameters(
    body: &mut serde_json::Map<String, Value>,
    params: &LlmParameters,
) {
    if let Some(temperature) = params.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = params.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if let Some(stop) = &params.stop {
        body.insert("stop".into(), json!(stop));
    }
    if let Some(max_tokens) = params.max_tokens {
        body.insert("max_tokens".into(), json!(max_tokens));
    }
    if let Some(presence_penalty) = params.presence_penalty {
        body.insert("presence_penalty".into(), json!(presence_penalty));
    }
    if let Some(frequency_penalty) = params.frequency_penalty {
        body.insert("frequency_penalty".into(), json!(frequency_penalty));
    }
    if let Some(logit_bias) = &params.logit_bias {
        body.insert("logit_bias".into(), json!(logit_bias));
    }
    if let Some(seed) = params.seed {
        body.insert("seed".into(), json!(seed));
    }
    if let Some(logprobs) = params.logprobs {
        body.insert("logprobs".into(), json!(logprobs));
    }
    if let Some(top_logprobs) = params.top_logprobs {
        body.insert("top_logprobs".into(), json!(top_logprobs));
    }
}

/// Drive a chat-completions SSE body to canonical deltas. `make_call_id` lets
/// OpenRouter disambiguate its upstream ids.
pub(super) fn completions_stream(
    request: reqwest::RequestBuilder,
    make_call_id: fn(&str) -> String,
) -> ContentStream {
    Box::pin(try_stream! {
        let response = request.send().await.context("error sending request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            Err(anyhow!("unexpected status code: {status}, body: {body}"))?;
            return;
        }

        let mut lines = Box::pin(response_lines(response));
        let mut acc = ToolCallAccumulator::default();
        let mut accepted_index: Option<u64> = None;

        while let Some(line) = lines.next().await {
            let line = line?;
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                break;
            }

            let event: Value = serde_json::from_str(data).context("error decoding response")?;
            if let Some(error) = event.get("error") {
                Err(anyhow!("provider error: {error}"))?;
            }
            let Some(choice) = event["choices"].get(0) else {
                continue;
            };
            let delta = &choice["delta"];

            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    yield Content::text(text);
                }
            }

            if let Some(calls) = delta["tool_calls"].as_array() {
                if calls.len() > 1 {
                    warn!(count = calls.len(), "received multiple tool calls, only the first one is supported");
                }
                for entry in calls {
                    let index = entry["index"].as_u64().unwrap_or(0);
                    match accepted_index {
                        None => {
                            accepted_index = Some(index);
                            let call_id = make_call_id(entry["id"].as_str().unwrap_or_default());
                            acc.begin(&call_id, entry["function"]["name"].as_str().unwrap_or_default());
                            acc.push_args(entry["function"]["arguments"].as_str().unwrap_or_default());
                        }
                        Some(accepted) if accepted == index => {
                            acc.push_args(entry["function"]["arguments"].as_str().unwrap_or_default());
                        }
                        Some(_) => {
                            warn!(
                                tool_name = entry["function"]["name"].as_str().unwrap_or_default(),
                                "only one tool call per turn is supported, dropping"
                            );
                        }
                    }
                }
            }
        }

        // The tool block ends with the stream.
        if let Some(call) = acc.finish() {
            yield call;
        }
    })
}

pub(super) async fn completions_title(request: reqwest::RequestBuilder) -> Result<String> {
    let response = request.send().await.context("error sending request")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("unexpected status code: {status}, body: {body}"));
    }

    let body: Value = response.json().await.context("error decoding response")?;
    if let Some(error) = body.get("error") {
        return Err(anyhow!("provider error: {error}"));
    }
    body["choices"]
        .get(0)
        .and_then(|choice| choice["message"]["content"].as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no choices found"))
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn stream_chat(&self, messages: &[Message], tools: &[ToolSpec]) -> ContentStream {
        let request = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.request_payload(messages, tools, true));

        completions_stream(request, str::to_string)
    }

    async fn generate_title(&self, user_text: &str) -> Result<String> {
        let request = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.request_payload(&[Message::user().with_text(user_text)], &[], false));

        completions_title(request).await
    }
}
