use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolContent {
    pub call_id: String,
    pub tool_name: String,
    /// The JSON object the model asked to invoke the tool with. Adapters that
    /// assembled argument fragments which do not parse as JSON carry the raw
    /// text as `Value::String`; the engine rejects it before dispatch.
    pub tool_input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultContent {
    pub call_id: String,
    pub tool_result: Value,
    pub failed: bool,
}

/// An atom within a message: plain text, a tool invocation the model
/// requested, or the result that invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Content {
    Text(TextContent),
    CallTool(CallToolContent),
    ToolResult(ToolResultContent),
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn call_tool<I, N>(call_id: I, tool_name: N, tool_input: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        Content::CallTool(CallToolContent {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            tool_input,
        })
    }

    pub fn tool_result<I: Into<String>>(call_id: I, tool_result: Value, failed: bool) -> Self {
        Content::ToolResult(ToolResultContent {
            call_id: call_id.into(),
            tool_result,
            failed,
        })
    }

    /// Get the text if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_call_tool(&self) -> Option<&CallToolContent> {
        match self {
            Content::CallTool(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultContent> {
        match self {
            Content::ToolResult(result) => Some(result),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialized_form_is_tagged() {
        let content = Content::call_tool("t1", "clock", json!({"tz": "UTC"}));
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["type"], "callTool");
        assert_eq!(value["callId"], "t1");
        assert_eq!(value["toolName"], "clock");
        assert_eq!(value["toolInput"], json!({"tz": "UTC"}));

        let back: Content = serde_json::from_value(value).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn text_round_trip() {
        let content = Content::text("hello");
        let raw = serde_json::to_string(&content).unwrap();
        let back: Content = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.as_text(), Some("hello"));
    }
}
