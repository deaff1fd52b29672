//! Markdown rendering of content sequences.
//!
//! The contents of a message are concatenated into one Markdown source and
//! converted to HTML in a single pass. Tool calls open a raw-HTML disclosure
//! block which the converter passes through; the matching tool result closes
//! it. Rendering is a pure function of the content slice.

use pulldown_cmark::{html, Event, Options, Parser};
use serde_json::Value;

use crate::models::Content;

/// Render a content sequence to an HTML fragment.
pub fn render_contents(contents: &[Content]) -> String {
    let source = markdown_source(contents);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);

    // GitHub treats every newline as a line break; map soft breaks to hard
    // ones so streamed prose wraps the same way.
    let parser = Parser::new_ext(&source, options).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });

    let mut out = String::with_capacity(source.len() * 2);
    html::push_html(&mut out, parser);
    out
}

fn markdown_source(contents: &[Content]) -> String {
    let mut src = String::new();
    for content in contents {
        match content {
            Content::Text(text) => src.push_str(&text.text),
            Content::CallTool(call) => {
                src.push_str("\n\n<details>\n<summary>Calling tool <code>");
                src.push_str(&call.tool_name);
                src.push_str("</code></summary>\n\n```json\n");
                src.push_str(&pretty(&call.tool_input));
                src.push_str("\n```\n");
            }
            Content::ToolResult(result) => {
                src.push_str("\n```json\n");
                src.push_str(&pretty(&result.tool_result));
                src.push_str("\n```\n\n</details>\n\n");
            }
        }
    }
    src
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
