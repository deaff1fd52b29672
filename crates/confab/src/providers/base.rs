use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::{Content, Message};
use crate::tool::ToolSpec;

/// A finite, non-restartable sequence of canonical content deltas: `Text`
/// fragments and fully assembled `CallTool`s, in emission order. The stream
/// terminates on its first error and never yields `ToolResult`.
pub type ContentStream = BoxStream<'static, Result<Content>>;

/// Base trait for LLM providers (Ollama, Anthropic, OpenAI, OpenRouter).
///
/// Every adapter translates the canonical history and tool catalog into its
/// own wire protocol and parses the streamed response back into canonical
/// deltas. The system prompt is owned by the adapter instance.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream one model turn over the given history.
    fn stream_chat(&self, messages: &[Message], tools: &[ToolSpec]) -> ContentStream;

    /// One non-streaming request returning the model's first reply text,
    /// used to label a chat after its first user message.
    async fn generate_title(&self, user_text: &str) -> Result<String>;
}

/// Sampling and decoding knobs. Each adapter forwards only the parameters its
/// provider supports, omitting unspecified ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmParameters {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub logit_bias: Option<HashMap<String, i32>>,
    pub seed: Option<i64>,
    pub logprobs: Option<bool>,
    pub top_logprobs: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_deserialize_from_camel_case() {
        let params: LlmParameters = serde_json::from_str(
            r#"{"temperature": 0.7, "topP": 0.9, "maxTokens": 512, "presencePenalty": 0.1}"#,
        )
        .unwrap();
        assert_eq!(params.temperature, Some(0.7));
        assert_eq!(params.top_p, Some(0.9));
        assert_eq!(params.max_tokens, Some(512));
        assert_eq!(params.presence_penalty, Some(0.1));
        assert_eq!(params.top_k, None);
    }
}
