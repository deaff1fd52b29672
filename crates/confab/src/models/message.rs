use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::Content;
use super::role::Role;

/// A single turn within a chat. User messages carry exactly one text content;
/// assistant messages interleave text, tool calls, and tool results, and are
/// updated in place while a turn streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub contents: Vec<Content>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message {
            id: String::new(),
            role: Role::User,
            contents: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message {
            id: String::new(),
            role: Role::Assistant,
            contents: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.contents.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(Content::text(text))
    }

    pub fn with_call_tool<I, N>(self, call_id: I, tool_name: N, tool_input: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        self.with_content(Content::call_tool(call_id, tool_name, tool_input))
    }

    pub fn with_tool_result<I: Into<String>>(
        self,
        call_id: I,
        tool_result: Value,
        failed: bool,
    ) -> Self {
        self.with_content(Content::tool_result(call_id, tool_result, failed))
    }

    /// The trailing tool call of an interrupted turn, if the message ends with
    /// one. A completed assistant message never does.
    pub fn dangling_call(&self) -> Option<&super::content::CallToolContent> {
        if self.role != Role::Assistant {
            return None;
        }
        self.contents.last().and_then(Content::as_call_tool)
    }
}
