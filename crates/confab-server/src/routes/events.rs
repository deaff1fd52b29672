use std::convert::Infallible;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;

use confab::broker::{message_topic, Event, Subscription, CHATS_TOPIC};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageEventsQuery {
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Per-message stream; `message_id` joins that message's topic on top of the
/// defaults every browser session gets.
pub async fn handle_message_events(
    State(state): State<AppState>,
    Query(query): Query<MessageEventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut topics = vec![CHATS_TOPIC.to_string()];
    if let Some(message_id) = query.message_id.filter(|id| !id.is_empty()) {
        topics.push(message_topic(&message_id));
    }
    subscribe(&state, topics)
}

pub async fn handle_chat_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    subscribe(&state, vec![CHATS_TOPIC.to_string()])
}

fn subscribe(
    state: &AppState,
    topics: Vec<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.broker.subscribe(topics);
    Sse::new(event_stream(subscription)).keep_alive(KeepAlive::default())
}

/// Forward broker events until the subscription ends; `closeChat` is the
/// shutdown marker, after which the stream closes and the subscription drops
/// out of the broker's table.
fn event_stream(
    mut subscription: Subscription,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream! {
        while let Some(event) = subscription.rx.recv().await {
            let closing = event == Event::CloseChat;
            yield Ok(SseEvent::default().event(event.name()).data(event.data()));
            if closing {
                break;
            }
        }
    }
}
