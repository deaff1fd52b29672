use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use serde::Deserialize;

use confab::models::Role;
use confab::render::render_contents;
use confab::registry::ToolDispatcher;

use crate::state::AppState;
use crate::templates;

#[derive(Debug, Deserialize)]
pub struct HomeQuery {
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// The home page: chat list, tool-server inventory, and, when a chat is
/// selected, its messages with streaming already ended.
pub async fn handle_home(
    State(state): State<AppState>,
    Query(query): Query<HomeQuery>,
) -> Result<Html<String>, (StatusCode, String)> {
    let chats = state
        .store
        .list_chats()
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    let current_chat_id = query.chat_id.unwrap_or_default();
    let mut messages_html = String::new();
    if !current_chat_id.is_empty() {
        let messages = state
            .store
            .list_messages(&current_chat_id)
            .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
        for message in &messages {
            let rendered = render_contents(&message.contents);
            messages_html.push_str(&match message.role {
                Role::User => templates::user_message(&message.id, &rendered),
                Role::Assistant => templates::assistant_message(&message.id, &rendered, false),
            });
        }
    }

    let page = templates::home_page(
        &templates::chat_list(&chats, &current_chat_id),
        &templates::inventory(
            state.registry.servers(),
            state.registry.tools(),
            state.registry.resources(),
            state.registry.prompts(),
        ),
        &templates::chatbox(&current_chat_id, &messages_html),
    );
    Ok(Html(page))
}
