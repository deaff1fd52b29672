use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::Form;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use confab::broker::{Event, CHATS_TOPIC};
use confab::models::{Chat, Message};
use confab::render::render_contents;

use crate::state::AppState;
use crate::templates;

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub chat_id: String,
}

type HandlerError = (StatusCode, String);

fn internal(err: anyhow::Error) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Accept a user message, persist it with an empty assistant placeholder,
/// and spawn the engine turn (plus the title generator for new chats). The
/// response is written as soon as the placeholders are durable; everything
/// else streams over the event topics.
pub async fn handle_chats(
    State(state): State<AppState>,
    Form(form): Form<ChatForm>,
) -> Result<Html<String>, HandlerError> {
    if form.message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message is required".to_string()));
    }

    let is_new_chat = form.chat_id.is_empty();
    let chat_id = if is_new_chat {
        new_chat(&state).map_err(internal)?
    } else {
        // A previous turn may have died between a tool call and its result;
        // finish that exchange before this one begins.
        if let Err(err) = state.engine.resume_interrupted(&form.chat_id).await {
            error!(%err, chat_id = %form.chat_id, "failed to repair interrupted turn");
        }
        form.chat_id.clone()
    };

    let user_msg = Message::user()
        .with_id(Uuid::new_v4().to_string())
        .with_text(&form.message);
    let user_msg_id = state
        .store
        .add_message(&chat_id, user_msg.clone())
        .map_err(internal)?;

    let ai_msg = Message::assistant().with_id(Uuid::new_v4().to_string());
    let ai_msg_id = state
        .store
        .add_message(&chat_id, ai_msg)
        .map_err(internal)?;

    let messages = state.store.list_messages(&chat_id).map_err(internal)?;

    {
        let state = state.clone();
        let chat_id = chat_id.clone();
        tokio::spawn(async move {
            state.engine.run(&chat_id, messages).await;
        });
    }

    if is_new_chat {
        let state_for_title = state.clone();
        let chat_id_for_title = chat_id.clone();
        let first_message = form.message.clone();
        tokio::spawn(async move {
            generate_chat_title(state_for_title, chat_id_for_title, first_message).await;
        });

        let messages = state.store.list_messages(&chat_id).map_err(internal)?;
        let mut messages_html = String::new();
        for message in &messages {
            let rendered = render_contents(&message.contents);
            if message.id == ai_msg_id {
                messages_html.push_str(&templates::assistant_message(&message.id, &rendered, true));
            } else {
                messages_html.push_str(&templates::user_message(&message.id, &rendered));
            }
        }
        return Ok(Html(templates::chatbox(&chat_id, &messages_html)));
    }

    let mut fragments = templates::user_message(&user_msg_id, &render_contents(&user_msg.contents));
    fragments.push_str(&templates::assistant_message(&ai_msg_id, "", true));
    Ok(Html(fragments))
}

/// Create the chat record and announce the refreshed list.
fn new_chat(state: &AppState) -> anyhow::Result<String> {
    let chat_id = state
        .store
        .add_chat(Chat::new(Uuid::new_v4().to_string()))?;

    let chats = state.store.list_chats()?;
    state.broker.publish(
        CHATS_TOPIC,
        Event::Chats(templates::chat_list(&chats, &chat_id)),
    );
    Ok(chat_id)
}

/// Label a new chat from its first user message. Failures are logged and the
/// chat keeps its empty title.
async fn generate_chat_title(state: AppState, chat_id: String, message: String) {
    let title = match state.title_provider.generate_title(&message).await {
        Ok(title) => title,
        Err(err) => {
            error!(%err, "error generating chat title");
            return;
        }
    };

    let chat = Chat {
        id: chat_id.clone(),
        title: title.trim().to_string(),
    };
    if let Err(err) = state.store.update_chat(&chat) {
        error!(%err, "failed to update chat title");
        return;
    }

    match state.store.list_chats() {
        Ok(chats) => state.broker.publish(
            CHATS_TOPIC,
            Event::Chats(templates::chat_list(&chats, &chat_id)),
        ),
        Err(err) => error!(%err, "failed to list chats for title update"),
    }
}
