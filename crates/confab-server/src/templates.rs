//! HTML fragments written back to the browser and published over the event
//! streams. The client is htmx plus its SSE extension: fragments rendered
//! here are swapped into the page as-is.

use confab::models::Chat;
use confab::registry::{PromptInfo, ResourceInfo, ServerSummary};
use confab::tool::ToolSpec;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn chat_title(chat: &Chat, active: bool) -> String {
    let class = if active { "chat-title active" } else { "chat-title" };
    let title = if chat.title.is_empty() {
        "New chat"
    } else {
        &chat.title
    };
    format!(
        "<div class=\"{class}\"><a href=\"/?chat_id={id}\">{title}</a></div>\n",
        id = escape(&chat.id),
        title = escape(title),
    )
}

/// The chat list fragment published on the `chats` topic, active chat marked.
pub fn chat_list(chats: &[Chat], active_id: &str) -> String {
    chats
        .iter()
        .map(|chat| chat_title(chat, chat.id == active_id))
        .collect()
}

pub fn user_message(id: &str, html: &str) -> String {
    format!(
        "<div class=\"message user\" id=\"message-{id}\">\n<div class=\"message-body\">{html}</div>\n</div>\n",
        id = escape(id),
    )
}

/// An assistant message. While the turn is streaming the body subscribes to
/// its per-message topic and swaps itself on every `messages` event, closing
/// on `closeMessage`.
pub fn assistant_message(id: &str, html: &str, streaming: bool) -> String {
    let id = escape(id);
    if streaming {
        format!(
            concat!(
                "<div class=\"message assistant\" id=\"message-{id}\">\n",
                "<div class=\"message-body\" hx-ext=\"sse\" ",
                "sse-connect=\"/sse/messages?message_id={id}\" ",
                "sse-swap=\"messages\" sse-close=\"closeMessage\">{html}</div>\n",
                "</div>\n",
            ),
            id = id,
            html = html,
        )
    } else {
        format!(
            "<div class=\"message assistant\" id=\"message-{id}\">\n<div class=\"message-body\">{html}</div>\n</div>\n",
        )
    }
}

/// The full conversation pane returned for a new chat.
pub fn chatbox(chat_id: &str, messages_html: &str) -> String {
    format!(
        concat!(
            "<div id=\"chatbox\">\n",
            "<div id=\"messages\">\n{messages}</div>\n",
            "<form id=\"chat-form\" hx-post=\"/chats\" hx-target=\"#messages\" hx-swap=\"beforeend\">\n",
            "<input type=\"hidden\" name=\"chat_id\" value=\"{id}\">\n",
            "<textarea name=\"message\" placeholder=\"Say something\" required></textarea>\n",
            "<button type=\"submit\">Send</button>\n",
            "</form>\n",
            "</div>\n",
        ),
        id = escape(chat_id),
        messages = messages_html,
    )
}

pub fn inventory(
    servers: &[ServerSummary],
    tools: &[ToolSpec],
    resources: &[ResourceInfo],
    prompts: &[PromptInfo],
) -> String {
    let mut out = String::from("<div id=\"inventory\">\n<h2>Tool servers</h2>\n<ul>\n");
    for server in servers {
        out.push_str(&format!(
            "<li>{} {}</li>\n",
            escape(&server.name),
            escape(&server.version)
        ));
    }
    out.push_str("</ul>\n<h2>Tools</h2>\n<ul>\n");
    for tool in tools {
        out.push_str(&format!(
            "<li><code>{}</code> {}</li>\n",
            escape(&tool.name),
            escape(&tool.description)
        ));
    }
    out.push_str("</ul>\n");
    if !resources.is_empty() {
        out.push_str("<h2>Resources</h2>\n<ul>\n");
        for resource in resources {
            out.push_str(&format!(
                "<li><code>{}</code> {}</li>\n",
                escape(&resource.uri),
                escape(&resource.name)
            ));
        }
        out.push_str("</ul>\n");
    }
    if !prompts.is_empty() {
        out.push_str("<h2>Prompts</h2>\n<ul>\n");
        for prompt in prompts {
            out.push_str(&format!(
                "<li><code>{}</code> {}</li>\n",
                escape(&prompt.name),
                escape(prompt.description.as_deref().unwrap_or_default())
            ));
        }
        out.push_str("</ul>\n");
    }
    out.push_str("</div>\n");
    out
}

pub fn home_page(chat_list_html: &str, inventory_html: &str, chatbox_html: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n",
            "<meta charset=\"utf-8\">\n",
            "<title>Confab</title>\n",
            "<link rel=\"stylesheet\" href=\"/static/style.css\">\n",
            "<script src=\"https://unpkg.com/htmx.org@1.9.12\"></script>\n",
            "<script src=\"https://unpkg.com/htmx.org@1.9.12/dist/ext/sse.js\"></script>\n",
            "<link rel=\"stylesheet\" href=\"https://cdnjs.cloudflare.com/ajax/libs/highlight.js/11.9.0/styles/github.min.css\">\n",
            "<script src=\"https://cdnjs.cloudflare.com/ajax/libs/highlight.js/11.9.0/highlight.min.js\"></script>\n",
            "<script>htmx.onLoad(function(el) {{ el.querySelectorAll('pre code').forEach(function(b) {{ hljs.highlightElement(b); }}); }});</script>\n",
            "</head>\n<body>\n",
            "<aside id=\"sidebar\">\n",
            "<a href=\"/\" id=\"new-chat\">New chat</a>\n",
            "<div id=\"chat-list\" hx-ext=\"sse\" sse-connect=\"/sse/chats\" sse-swap=\"chats\">\n",
            "{chat_list}",
            "</div>\n",
            "{inventory}",
            "</aside>\n",
            "<main>\n{chatbox}</main>\n",
            "</body>\n</html>\n",
        ),
        chat_list = chat_list_html,
        inventory = inventory_html,
        chatbox = chatbox_html,
    )
}
