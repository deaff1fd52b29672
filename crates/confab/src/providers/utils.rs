//! Pieces shared by the provider adapters: line splitting of streamed HTTP
//! bodies, reassembly of fragmented tool calls, and the OpenAI-style wire
//! translation used by more than one provider.

use anyhow::{Context, Result};
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::warn;

use crate::models::{Content, Message};
use crate::tool::ToolSpec;

/// Split a streamed response body into trimmed, non-empty lines. Both the SSE
/// providers (`data:` framing) and Ollama's NDJSON ride on this.
pub fn response_lines(response: reqwest::Response) -> impl Stream<Item = Result<String>> {
    try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.context("error reading response")?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
                if !line.is_empty() {
                    yield line;
                }
            }
        }
        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).trim().to_string();
            if !line.is_empty() {
                yield line;
            }
        }
    }
}

/// Reassembles one tool call from a provider's streamed fragments.
///
/// Providers deliver the tool name and call id when a tool block starts and
/// the JSON arguments as string fragments; the accumulator concatenates them
/// and emits a single `CallTool` when the block ends. Only one tool call per
/// turn is honored; later ones are logged and dropped.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    call_id: Option<String>,
    tool_name: Option<String>,
    args: String,
    emitted: bool,
}

impl ToolCallAccumulator {
    pub fn is_active(&self) -> bool {
        self.tool_name.is_some()
    }

    /// Start accumulating a tool block. Returns false when the block is
    /// dropped because a call is already in flight or was already emitted.
    pub fn begin(&mut self, call_id: &str, tool_name: &str) -> bool {
        if self.is_active() || self.emitted {
            warn!(
                tool_name,
                "only one tool call per turn is supported, dropping"
            );
            return false;
        }
        self.call_id = Some(call_id.to_string());
        self.tool_name = Some(tool_name.to_string());
        true
    }

    pub fn push_args(&mut self, fragment: &str) {
        if self.is_active() {
            self.args.push_str(fragment);
        }
    }

    /// Close the current block and emit the assembled call. Empty arguments
    /// become the empty object; arguments that do not parse as JSON are
    /// carried as a raw string for the engine to reject.
    pub fn finish(&mut self) -> Option<Content> {
        let tool_name = self.tool_name.take()?;
        let call_id = self.call_id.take().unwrap_or_default();
        let raw = std::mem::take(&mut self.args);
        let raw = if raw.is_empty() { "{}".to_string() } else { raw };
        let input =
            serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| Value::String(raw));
        self.emitted = true;
        Some(Content::call_tool(call_id, tool_name, input))
    }
}

/// Convert the canonical history to OpenAI's chat-completions message spec,
/// with the system prompt as the leading turn. OpenRouter and Ollama follow
/// the same general shape.
pub fn messages_to_openai_spec(system_prompt: &str, messages: &[Message]) -> Vec<Value> {
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
                            "id": call.call_id,
                            "type": "function",
                            "function": {
                                "name": call.tool_name,
                                "arguments": call.tool_input.to_string(),
                            },
                        }],
                    }));
                }
                Content::ToolResult(result) => {
                    spec.push(json!({
                        "role": "tool",
                        "tool_call_id": result.call_id,
                        "content": result.tool_result.to_string(),
                    }));
                }
            }
        }
    }

    spec
}

/// Convert the tool catalog to OpenAI's function-tool declaration format.
pub fn tools_to_openai_spec(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_assembles_fragments_into_one_object() {
        let mut acc = ToolCallAccumulator::default();
        assert!(acc.begin("t1", "clock"));
        acc.push_args(r#"{"tz":"#);
        acc.push_args(r#""UTC"}"#);

        let content = acc.finish().unwrap();
        let call = content.as_call_tool().unwrap();
        assert_eq!(call.call_id, "t1");
        assert_eq!(call.tool_name, "clock");
        assert_eq!(call.tool_input, json!({"tz": "UTC"}));
    }

    #[test]
    fn accumulator_substitutes_empty_object_for_empty_arguments() {
        let mut acc = ToolCallAccumulator::default();
        acc.begin("t1", "ping");
        let content = acc.finish().unwrap();
        assert_eq!(content.as_call_tool().unwrap().tool_input, json!({}));
    }

    #[test]
    fn accumulator_carries_invalid_json_as_raw_string() {
        let mut acc = ToolCallAccumulator::default();
        acc.begin("t1", "clock");
        acc.push_args("not");
        acc.push_args("json");
        let content = acc.finish().unwrap();
        assert_eq!(
            content.as_call_tool().unwrap().tool_input,
            Value::String("notjson".into())
        );
    }

    #[test]
    fn accumulator_drops_a_second_call() {
        let mut acc = ToolCallAccumulator::default();
        assert!(acc.begin("t1", "clock"));
        assert!(!acc.begin("t2", "weather"));
        acc.push_args("{}");
        assert_eq!(acc.finish().unwrap().as_call_tool().unwrap().tool_name, "clock");
        assert!(!acc.begin("t3", "clock"));
        assert!(acc.finish().is_none());
    }

    #[test]
    fn openai_spec_starts_with_the_system_prompt() {
        let messages = vec![Message::user().with_text("Hello")];
        let spec = messages_to_openai_spec("You are a helpful assistant.", &messages);
        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[0]["content"], "You are a helpful assistant.");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[1]["content"], "Hello");
    }

    #[test]
    fn openai_spec_splits_tool_turns() {
        let messages = vec![
            Message::user().with_text("What time is it?"),
            Message::assistant()
                .with_text("Let me check.")
                .with_call_tool("t1", "clock", json!({"tz": "UTC"}))
                .with_tool_result("t1", json!({"time": "00:00"}), false)
                .with_text("It is midnight UTC."),
        ];
        let spec = messages_to_openai_spec("sys", &messages);

        assert_eq!(spec.len(), 6);
        assert_eq!(spec[2]["role"], "assistant");
        assert_eq!(spec[2]["content"], "Let me check.");
        assert_eq!(spec[3]["role"], "assistant");
        assert_eq!(spec[3]["tool_calls"][0]["id"], "t1");
        assert_eq!(
            spec[3]["tool_calls"][0]["function"]["arguments"],
            r#"{"tz":"UTC"}"#
        );
        assert_eq!(spec[4]["role"], "tool");
        assert_eq!(spec[4]["tool_call_id"], "t1");
        assert_eq!(spec[5]["content"], "It is midnight UTC.");
    }

    #[test]
    fn tools_spec_declares_json_schema() {
        let tools = vec![ToolSpec::new(
            "clock",
            "Tells the time",
            json!({"type": "object", "properties": {"tz": {"type": "string"}}}),
        )];
        let spec = tools_to_openai_spec(&tools);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "clock");
        assert_eq!(spec[0]["function"]["parameters"]["type"], "object");
    }
}
