use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool a model can invoke, as advertised by a tool server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON Schema of the tool's input object
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}
