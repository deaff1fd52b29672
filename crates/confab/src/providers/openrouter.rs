use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{ContentStream, Provider};
use super::configs::OpenRouterProviderConfig;
use super::openai::{apply_openai_parameters, completions_stream, completions_title};
use super::utils::{messages_to_openai_spec, tools_to_openai_spec};
use crate::models::Message;
use crate::tool::ToolSpec;

pub const OPENROUTER_HOST: &str = "https://openrouter.ai/api";

pub struct OpenRouterProvider {
    client: Client,
    config: OpenRouterProviderConfig,
    system_prompt: String,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterProviderConfig, system_prompt: &str) -> Result<Self> {
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
        // OpenRouter additionally routes top_k through to backends that take it.
        if let Some(top_k) = self.config.parameters.top_k {
            body.insert("top_k".into(), json!(top_k));
        }

        payload
    }

    fn request(&self, payload: &Value) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("HTTP-Referer", "https://github.com/confab-chat/confab")
            .header("X-Title", "Confab")
            .json(payload)
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn stream_chat(&self, messages: &[Message], tools: &[ToolSpec]) -> ContentStream {
        let request = self.request(&self.request_payload(messages, tools, true));
        // Some routed backends reuse upstream call ids between turns; a
        // millisecond suffix keeps them unique within a chat.
        completions_stream(request, |id| {
            format!("{id}-{}", Utc::now().timestamp_millis())
        })
    }

    async fn generate_title(&self, user_text: &str) -> Result<String> {
        let request =
            self.request(&self.request_payload(&[Message::user().with_text(user_text)], &[], false));
        completions_title(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Content;
    use crate::providers::base::LlmParameters;
    use futures::StreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(host: String) -> OpenRouterProvider {
        let config = OpenRouterProviderConfig {
            host,
            api_key: "test_api_key".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            parameters: LlmParameters::default(),
        };
        OpenRouterProvider::new(config, "You are a helpful assistant.").unwrap()
    }

    #[tokio::test]
    async fn suffixes_tool_call_ids_with_a_timestamp() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"clock\",\"arguments\":\"{}\"}}]}}]}\n",
            "data: [DONE]\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("HTTP-Referer", "https://github.com/confab-chat/confab"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;
        let provider = provider(server.uri());

        let contents: Vec<Content> = provider
            .stream_chat(&[Message::user().with_text("time?")], &[])
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let call = contents[0].as_call_tool().unwrap();
        assert!(call.call_id.starts_with("call_1-"));
        assert!(call.call_id.len() > "call_1-".len());
    }

    #[tokio::test]
    async fn generates_title_from_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Checking the clock"}}],
            })))
            .mount(&server)
            .await;
        let provider = provider(server.uri());

        let title = provider.generate_title("what time is it").await.unwrap();
        assert_eq!(title, "Checking the clock");
    }
}
