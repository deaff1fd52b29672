use anyhow::{anyhow, Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{ContentStream, Provider};
use super::configs::AnthropicProviderConfig;
use super::utils::{response_lines, ToolCallAccumulator};
use crate::models::{Content, Message, Role};
use crate::tool::ToolSpec;

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
    system_prompt: String,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig, system_prompt: &str) -> Result<Self> {
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
            "messages": messages_to_anthropic_spec(messages),
            "system": self.system_prompt,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        });

        let params = &self.config.parameters;
        let body = payload.as_object_mut().expect("payload is an object");
        if let Some(temperature) = params.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = params.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        if let Some(top_k) = params.top_k {
            body.insert("top_k".into(), json!(top_k));
        }
        if let Some(stop) = &params.stop {
            body.insert("stop_sequences".into(), json!(stop));
        }

        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.input_schema,
                    })
                })
                .collect();
            body.insert("tools".into(), json!(tools));
        }

        payload
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.host.trim_end_matches('/'))
    }
}

/// Convert the canonical history to Anthropic's message spec. Consecutive
/// assistant contents coalesce into one turn of content blocks; a tool result
/// becomes a `tool_result` block in a following user turn.
fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut spec = Vec::new();

    for message in messages {
        match message.role {
            Role::User => {
                for content in &message.contents {
                    if let Some(text) = content.as_text() {
                        spec.push(json!({"role": "user", "content": text}));
                    }
                }
            }
            Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                for content in &message.contents {
                    match content {
                        Content::Text(text) => {
                            if !text.text.is_empty() {
                                blocks.push(json!({"type": "text", "text": text.text}));
                            }
                        }
                        Content::CallTool(call) => {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.call_id,
                                "name": call.tool_name,
                                "input": call.tool_input,
                            }));
                        }
                        Content::ToolResult(result) => {
                            if !blocks.is_empty() {
                                spec.push(json!({"role": "assistant", "content": blocks}));
                                blocks = Vec::new();
                            }
                            spec.push(json!({
                                "role": "user",
                                "content": [{
                                    "type": "tool_result",
                                    "tool_use_id": result.call_id,
                                    "content": result.tool_result.to_string(),
                                    "is_error": result.failed,
                                }],
                            }));
                        }
                    }
                }
                if !blocks.is_empty() {
                    spec.push(json!({"role": "assistant", "content": blocks}));
                }
            }
        }
    }

    spec
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn stream_chat(&self, messages: &[Message], tools: &[ToolSpec]) -> ContentStream {
        let client = self.client.clone();
        let api_key = self.config.api_key.clone();
        let url = self.messages_url();
        let payload = self.request_payload(messages, tools, true);

        Box::pin(try_stream! {
            let response = client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&payload)
                .send()
                .await
                .context("error sending request")?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("unexpected status code: {status}, body: {body}"))?;
                return;
            }

            let mut lines = Box::pin(response_lines(response));
            let mut acc = ToolCallAccumulator::default();
            let mut in_tool_block = false;

            while let Some(line) = lines.next().await {
                let line = line?;
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let event: Value = serde_json::from_str(data.trim_start())
                    .context("error decoding response")?;

                match event["type"].as_str().unwrap_or_default() {
                    "error" => {
                        Err(anyhow!("provider error: {}", event["error"]))?;
                    }
                    "message_stop" => break,
                    "content_block_start" => {
                        let block = &event["content_block"];
                        if block["type"] == "tool_use" {
                            in_tool_block = acc.begin(
                                block["id"].as_str().unwrap_or_default(),
                                block["name"].as_str().unwrap_or_default(),
                            );
                        }
                    }
                    "content_block_delta" => match event["delta"]["type"].as_str().unwrap_or_default() {
                        "text_delta" => {
                            let text = event["delta"]["text"].as_str().unwrap_or_default();
                            if !text.is_empty() {
                                yield Content::text(text);
                            }
                        }
                        "input_json_delta" => {
                            if in_tool_block {
                                acc.push_args(
                                    event["delta"]["partial_json"].as_str().unwrap_or_default(),
                                );
                            }
                        }
                        _ => {}
                    },
                    "content_block_stop" => {
                        if in_tool_block {
                            in_tool_block = false;
                            if let Some(call) = acc.finish() {
                                yield call;
                            }
                        }
                    }
                    _ => {}
                }
            }
        })
    }

    async fn generate_title(&self, user_text: &str) -> Result<String> {
        let payload = self.request_payload(
            &[Message::user().with_text(user_text)],
            &[],
            false,
        );

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .context("error sending request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("unexpected status code: {status}, body: {body}"));
        }

        let body: Map<String, Value> = response.json().await.context("error decoding response")?;
        body.get("content")
            .and_then(|content| content.as_array())
            .and_then(|blocks| blocks.first())
            .and_then(|block| block["text"].as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no content in response"))
    }
}
