pub mod chats;
pub mod events;
pub mod home;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Wire up the HTTP surface.
pub fn configure(state: AppState) -> Router {
    Router::new()
        .route("/", get(home::handle_home))
        .route("/chats", post(chats::handle_chats))
        .route("/sse/messages", get(events::handle_message_events))
        .route("/sse/chats", get(events::handle_chat_events))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use confab::broker::EventBroker;
    use confab::models::{Content, Message};
    use confab::providers::base::{ContentStream, Provider};
    use confab::registry::ToolRegistry;
    use confab::store::MessageStore;
    use confab::tool::ToolSpec;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    /// Replays a fixed text turn; every chat gets the same reply.
    struct ScriptedProvider;

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn stream_chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> ContentStream {
            Box::pin(futures::stream::iter(vec![
                Ok(Content::text("Hi ")),
                Ok(Content::text("there")),
            ]))
        }

        async fn generate_title(&self, _user_text: &str) -> Result<String> {
            Ok("Friendly greeting".to_string())
        }
    }

    async fn test_state() -> AppState {
        let store = Arc::new(MessageStore::in_memory().unwrap());
        let registry = Arc::new(ToolRegistry::connect(&[]).await);
        let broker = EventBroker::new();
        AppState::new(
            store,
            registry,
            broker,
            Arc::new(ScriptedProvider),
            Arc::new(ScriptedProvider),
        )
    }

    fn post_form(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chats")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn empty_message_is_a_bad_request() {
        let app = configure(test_state().await);
        let response = app.oneshot(post_form("message=&chat_id=")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chats_rejects_non_post_verbs() {
        let app = configure(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/chats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn home_page_renders() {
        let app = configure(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("<title>Confab</title>"));
        assert!(body.contains("chat-list"));
    }

    #[tokio::test]
    async fn new_chat_returns_a_chatbox_and_streams_to_completion() {
        let state = test_state().await;
        let app = configure(state.clone());

        let response = app.oneshot(post_form("message=Hello&chat_id=")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("id=\"chatbox\""));
        assert!(body.contains("sse-connect"));

        let chat_id = state.store.list_chats().unwrap()[0].id.clone();

        // The engine task runs detached; wait for the reply and the title.
        let mut completed = false;
        for _ in 0..100 {
            let messages = state.store.list_messages(&chat_id).unwrap();
            let replied = messages
                .last()
                .and_then(|msg| msg.contents.first())
                .and_then(Content::as_text)
                == Some("Hi there");
            let titled = state.store.list_chats().unwrap()[0].title == "Friendly greeting";
            if replied && titled {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(completed, "assistant reply and title were not persisted");
    }

    #[tokio::test]
    async fn continuation_returns_message_fragments() {
        let state = test_state().await;
        let app = configure(state.clone());

        // Seed a chat the way a first POST would have.
        let chat_id = state
            .store
            .add_chat(confab::models::Chat::new("seed"))
            .unwrap();
        state
            .store
            .add_message(&chat_id, Message::user().with_text("earlier"))
            .unwrap();

        let response = app
            .oneshot(post_form(&format!("message=More&chat_id={chat_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        // Two fragments, not a full chatbox.
        assert!(!body.contains("id=\"chatbox\""));
        assert!(body.contains("message user"));
        assert!(body.contains("message assistant"));
    }
}
