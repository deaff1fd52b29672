use anyhow::{anyhow, Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use super::base::{ContentStream, LlmParameters, Provider};
use super::configs::OllamaProviderConfig;
use super::utils::{response_lines, tools_to_openai_spec};
use crate::models::{Content, Message};
use crate::tool::ToolSpec;

pub const OLLAMA_HOST: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
    system_prompt: String,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig, system_prompt: &str) -> Result<Self> {
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
            "messages": messages_to_ollama_spec(&self.system_prompt, messages),
            "stream": stream,
        });

        let body = payload.as_object_mut().expect("payload is an object");
        if !tools.is_empty() {
            // Ollama takes the same function-tool declarations as OpenAI.
            body.insert("tools".into(), json!(tools_to_openai_spec(tools)));
        }
        let options = ollama_options(&self.config.parameters);
        if !options.is_empty() {
            body.insert("options".into(), Value::Object(options));
        }

        payload
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.host.trim_end_matches('/'))
    }
}

fn ollama_options(params: &LlmParameters) -> serde_json::Map<String, Value> {
    let mut options = serde_json::Map::new();
    if let Some(temperature) = params.temperature {
        options.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = params.top_p {
        options.insert("top_p".into(), json!(top_p));
    }
    if let Some(top_k) = params.top_k {
        options.insert("top_k".into(), json!(top_k));
    }
    if let Some(stop) = &params.stop {
        options.insert("stop".into(), json!(stop));
    }
    if let Some(max_tokens) = params.max_tokens {
        options.insert("num_predict".into(), json!(max_tokens));
    }
    if let Some(presence_penalty) = params.presence_penalty {
        options.insert("presence_penalty".into(), json!(presence_penalty));
    }
    if let Some(frequency_penalty) = params.frequency_penalty {
        options.insert("frequency_penalty".into(), json!(frequency_penalty));
    }
    if let Some(seed) = params.seed {
        options.insert("seed".into(), json!(seed));
    }
    options
}

fn messages_to_ollama_spec(system_prompt: &str, messages: &[Message]) -> Vec<Value> {
    let mut spec = vec![json!({
        "role": "system",
        "content": system_prompt,
    })];

    for message in messages {
        for content in &message.contents {
            match content {
                Content::Text(text) => {
                    if !text.text.is_empty() {
                        spec.push(json!({
                            "role": message.role,
                            "content": text.text,
                        }));
                    }
                }
                Content::CallTool(call) => {
                    spec.push(json!({
                        "role": "assistant",
                        "tool_calls": [{
                            "function": {
                                "name": call.tool_name,
                                "arguments": call.tool_input,
                            },
                        }],
                    }));
                }
                Content::ToolResult(result) => {
                    spec.push(json!({
                        "role": "tool",
                        "content": result.tool_result.to_string(),
                    }));
                }
            }
        }
    }

    spec
}

#[async_trait]
impl Provider for OllamaProvider {
    fn stream_chat(&self, messages: &[Message], tools: &[ToolSpec]) -> ContentStream {
        let client = self.client.clone();
        let url = self.chat_url();
        let payload = self.request_payload(messages, tools, true);

        Box::pin(try_stream! {
            let response = client
                .post(&url)
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
            let mut tool_emitted = false;

            while let Some(line) = lines.next().await {
                let line = line?;
                let event: Value =
                    serde_json::from_str(&line).context("error decoding response")?;
                if let Some(error) = event.get("error") {
                    Err(anyhow!("provider error: {error}"))?;
                }

                if let Some(text) = event["message"]["content"].as_str() {
                    if !text.is_empty() {
                        yield Content::text(text);
                    }
                }

                // Ollama hands tool calls over whole, arguments already
                // parsed into a map; its wire carries no call id.
                if let Some(calls) = event["message"]["tool_calls"].as_array() {
                    if calls.len() > 1 {
                        warn!(count = calls.len(), "received multiple tool calls, only the first one is supported");
                    }
                    if let Some(entry) = calls.first() {
                        if tool_emitted {
                            warn!(
                                tool_name = entry["function"]["name"].as_str().unwrap_or_default(),
                                "only one tool call per turn is supported, dropping"
                            );
                        } else {
                            tool_emitted = true;
                            yield Content::call_tool(
                                format!("ollama-{}", Utc::now().timestamp_millis()),
                                entry["function"]["name"].as_str().unwrap_or_default(),
                                entry["function"]["arguments"].clone(),
                            );
                        }
                    }
                }

                if event["done"].as_bool().unwrap_or(false) {
                    break;
                }
            }
        })
    }

    async fn generate_title(&self, user_text: &str) -> Result<String> {
        let payload = self.request_payload(&[Message::user().with_text(user_text)], &[], false);

        let response = self
            .client
            .post(self.chat_url())
            .json(&payload)
            .send()
            .await
            .context("error sending request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("unexpected status code: {status}, body: {body}"));
        }

        let body: Value = response.json().await.context("error decoding response")?;
        if let Some(error) = body.get("error") {
            return Err(anyhow!("provider error: {error}"));
        }
        body["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no content in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(host: String) -> OllamaProvider {
        let config = OllamaProviderConfig {
            host,
            model: "qwen2.5".to_string(),
            parameters: LlmParameters::default(),
        };
        OllamaProvider::new(config, "You are a helpful assistant.").unwrap()
    }

    async fn mock_stream(body: &str) -> (MockServer, OllamaProvider) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.to_string(), "application/x-ndjson"),
            )
            .mount(&server)
            .await;
        let provider = provider(server.uri());
        (server, provider)
    }

    async fn collect(provider: &OllamaProvider) -> Vec<Content> {
        provider
            .stream_chat(&[Message::user().with_text("Hello?")], &[])
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[tokio::test]
    async fn streams_ndjson_text_until_done() {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi \"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"there\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        let (_server, provider) = mock_stream(body).await;

        let contents = collect(&provider).await;
        assert_eq!(contents, vec![Content::text("Hi "), Content::text("there")]);
    }

    #[tokio::test]
    async fn serializes_parsed_tool_arguments_back_to_json() {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"clock\",\"arguments\":{\"tz\":\"UTC\"}}}]},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        let (_server, provider) = mock_stream(body).await;

        let contents = collect(&provider).await;
        assert_eq!(contents.len(), 1);
        let call = contents[0].as_call_tool().unwrap();
        assert_eq!(call.tool_name, "clock");
        assert_eq!(call.tool_input, json!({"tz": "UTC"}));
        assert!(call.call_id.starts_with("ollama-"));
    }

    #[tokio::test]
    async fn provider_error_terminates_the_stream() {
        let body = "{\"error\":\"model not found\"}\n";
        let (_server, provider) = mock_stream(body).await;

        let results: Vec<Result<Content>> = provider
            .stream_chat(&[Message::user().with_text("Hello?")], &[])
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("model not found"));
    }

    #[tokio::test]
    async fn generates_title_from_single_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "Greeting the assistant"},
                "done": true,
            })))
            .mount(&server)
            .await;
        let provider = provider(server.uri());

        let title = provider.generate_title("Hello").await.unwrap();
        assert_eq!(title, "Greeting the assistant");
    }

    #[test]
    fn tool_results_use_the_tool_role() {
        let messages = vec![
            Message::user().with_text("time?"),
            Message::assistant()
                .with_call_tool("t1", "clock", json!({"tz": "UTC"}))
                .with_tool_result("t1", json!({"time": "00:00"}), false),
        ];
        let spec = messages_to_ollama_spec("sys", &messages);
        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[2]["role"], "assistant");
        assert_eq!(spec[2]["tool_calls"][0]["function"]["arguments"], json!({"tz": "UTC"}));
        assert_eq!(spec[3]["role"], "tool");
        assert_eq!(spec[3]["content"], "{\"time\":\"00:00\"}");
    }

    #[test]
    fn options_forward_only_supported_parameters() {
        let params = LlmParameters {
            temperature: Some(0.2),
            max_tokens: Some(128),
            logit_bias: Some(Default::default()),
            ..Default::default()
        };
        let options = ollama_options(&params);
        assert_eq!(options.get("temperature"), Some(&json!(0.2)));
        assert_eq!(options.get("num_predict"), Some(&json!(128)));
        // No logit bias on the Ollama wire.
        assert!(!options.contains_key("logit_bias"));
    }
}
