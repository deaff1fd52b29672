//! The agentic loop: drive a provider stream, persist and publish every
//! delta, dispatch assembled tool calls, feed results back, and repeat until
//! the model finishes a turn without calling a tool.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tracing::error;

use crate::broker::{message_topic, Event, EventBroker, DEFAULT_TOPIC};
use crate::models::{Content, Message};
use crate::providers::base::Provider;
use crate::registry::ToolDispatcher;
use crate::render::render_contents;
use crate::store::MessageStore;

pub struct ConversationEngine {
    store: Arc<MessageStore>,
    dispatcher: Arc<dyn ToolDispatcher>,
    broker: Arc<EventBroker>,
    provider: Arc<dyn Provider>,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<MessageStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        broker: Arc<EventBroker>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            broker,
            provider,
        }
    }

    /// Drive one POSTed user message to completion. `messages` is the chat's
    /// history whose last entry is the empty assistant placeholder; this task
    /// is the sole writer for that message id.
    pub async fn run(&self, chat_id: &str, messages: Vec<Message>) {
        self.drive(chat_id, messages).await;
        self.broker.publish(DEFAULT_TOPIC, Event::CloseMessage);
    }

    async fn drive(&self, chat_id: &str, mut messages: Vec<Message>) {
        let Some(mut ai_msg) = messages.last().cloned() else {
            return;
        };
        let topic = message_topic(&ai_msg.id);
        let tools = self.dispatcher.tools().to_vec();

        loop {
            // The cursor all text deltas of this turn append to.
            ai_msg.contents.push(Content::text(""));
            let mut pending_call = false;
            let mut bad_input: Option<String> = None;

            let mut stream = self.provider.stream_chat(&messages, &tools);
            while let Some(item) = stream.next().await {
                let content = match item {
                    Ok(content) => content,
                    Err(err) => {
                        self.broker.publish(&topic, Event::Messages(err.to_string()));
                        return;
                    }
                };

                match content {
                    Content::Text(delta) => {
                        if let Some(Content::Text(cursor)) = ai_msg.contents.last_mut() {
                            cursor.text.push_str(&delta.text);
                        }
                    }
                    Content::CallTool(mut call) => {
                        if !call.tool_input.is_object() {
                            // Keep the raw input for the error report, but
                            // persist something well-formed.
                            bad_input = Some(raw_input(&call.tool_input));
                            call.tool_input = json!({});
                        }
                        pending_call = true;
                        ai_msg.contents.push(Content::CallTool(call));
                    }
                    Content::ToolResult(_) => {
                        error!("provider yielded a tool result, aborting turn");
                        return;
                    }
                }

                if let Err(err) = self.store.update_message(chat_id, &ai_msg) {
                    error!(%err, "failed to save streamed content");
                    return;
                }
                self.broker
                    .publish(&topic, Event::Messages(render_contents(&ai_msg.contents)));

                if pending_call {
                    // The rest of this turn's deltas are not consumed.
                    break;
                }
            }

            if !pending_call {
                break;
            }

            let Some(call) = ai_msg.contents.last().and_then(Content::as_call_tool).cloned()
            else {
                return;
            };

            let result = match bad_input {
                Some(raw) => Content::tool_result(
                    call.call_id,
                    json!({"error": format!("tool input {raw} is not valid json")}),
                    true,
                ),
                None => {
                    let (value, success) = self
                        .dispatcher
                        .call_tool(&call.tool_name, call.tool_input)
                        .await;
                    Content::tool_result(call.call_id, value, !success)
                }
            };
            ai_msg.contents.push(result);

            if let Err(err) = self.store.update_message(chat_id, &ai_msg) {
                error!(%err, "failed to save tool result");
                return;
            }
            if let Some(last) = messages.last_mut() {
                *last = ai_msg.clone();
            }
        }
    }

    /// Repair a chat whose previous turn crashed between a tool call and its
    /// result: invoke the tool now and finalize the stored message. Runs
    /// before a continuation appends its new user message.
    pub async fn resume_interrupted(&self, chat_id: &str) -> anyhow::Result<()> {
        let mut messages = self.store.list_messages(chat_id)?;
        let Some(last) = messages.last_mut() else {
            return Ok(());
        };
        let Some(call) = last.dangling_call().cloned() else {
            return Ok(());
        };

        let (value, success) = self
            .dispatcher
            .call_tool(&call.tool_name, call.tool_input)
            .await;
        last.contents
            .push(Content::tool_result(call.call_id, value, !success));
        self.store.update_message(chat_id, last)?;
        Ok(())
    }
}

fn raw_input(input: &Value) -> String {
    match input {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chat;
    use crate::providers::mock::{MockDelta, MockProvider};
    use crate::tool::ToolSpec;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MockDispatcher {
        tools: Vec<ToolSpec>,
        results: HashMap<String, Value>,
    }

    impl MockDispatcher {
        fn new(results: Vec<(&str, Value)>) -> Self {
            let tools = results
                .iter()
                .map(|(name, _)| ToolSpec::new(*name, "", json!({"type": "object"})))
                .collect();
            Self {
                tools,
                results: results
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ToolDispatcher for MockDispatcher {
        fn tools(&self) -> &[ToolSpec] {
            &self.tools
        }

        async fn call_tool(&self, name: &str, _input: Value) -> (Value, bool) {
            match self.results.get(name) {
                Some(value) => (value.clone(), true),
                None => (json!({"error": format!("tool {name} is not found")}), false),
            }
        }
    }

    struct Fixture {
        store: Arc<MessageStore>,
        broker: Arc<EventBroker>,
        engine: ConversationEngine,
        chat_id: String,
    }

    fn fixture(provider: MockProvider, dispatcher: MockDispatcher) -> Fixture {
        let store = Arc::new(MessageStore::in_memory().unwrap());
        let broker = EventBroker::new();
        let chat_id = store.add_chat(Chat::new("c1")).unwrap();
        let engine = ConversationEngine::new(
            Arc::clone(&store),
            Arc::new(dispatcher),
            Arc::clone(&broker),
            Arc::new(provider),
        );
        Fixture {
            store,
            broker,
            engine,
            chat_id,
        }
    }

    /// Seed the user message and the assistant placeholder, returning the
    /// history the way the POST handler hands it to the engine.
    fn seed(fixture: &Fixture, user_text: &str) -> Vec<Message> {
        fixture
            .store
            .add_message(&fixture.chat_id, Message::user().with_text(user_text))
            .unwrap();
        fixture
            .store
            .add_message(&fixture.chat_id, Message::assistant())
            .unwrap();
        fixture.store.list_messages(&fixture.chat_id).unwrap()
    }

    fn stored_assistant(fixture: &Fixture) -> Message {
        fixture
            .store
            .list_messages(&fixture.chat_id)
            .unwrap()
            .pop()
            .unwrap()
    }

    #[tokio::test]
    async fn text_only_turn_persists_and_publishes_each_delta() {
        let provider = MockProvider::new(vec![MockProvider::text_turn(&["Hi ", "there"])]);
        let fixture = fixture(provider, MockDispatcher::new(vec![]));
        let messages = seed(&fixture, "Hello");
        let ai_id = messages.last().unwrap().id.clone();

        let mut sub = fixture.broker.subscribe([message_topic(&ai_id)]);
        fixture.engine.run(&fixture.chat_id, messages).await;

        let assistant = stored_assistant(&fixture);
        assert_eq!(assistant.contents, vec![Content::text("Hi there")]);

        let first = sub.rx.try_recv().unwrap();
        let second = sub.rx.try_recv().unwrap();
        assert!(matches!(first, Event::Messages(ref html) if html.contains("Hi")));
        assert!(matches!(second, Event::Messages(ref html) if html.contains("Hi there")));
        assert_eq!(sub.rx.try_recv().unwrap(), Event::CloseMessage);
    }

    #[tokio::test]
    async fn tool_round_trip_interleaves_contents_in_order() {
        let provider = MockProvider::new(vec![
            vec![
                MockDelta::Content(Content::text("Let me check.")),
                MockDelta::Content(Content::call_tool("t1", "clock", json!({"tz": "UTC"}))),
            ],
            MockProvider::text_turn(&["It is midnight UTC."]),
        ]);
        let dispatcher =
            MockDispatcher::new(vec![("clock", json!({"time": "2025-01-01T00:00:00Z"}))]);
        let fixture = fixture(provider, dispatcher);
        let messages = seed(&fixture, "What time is it?");

        fixture.engine.run(&fixture.chat_id, messages).await;

        let assistant = stored_assistant(&fixture);
        assert_eq!(
            assistant.contents,
            vec![
                Content::text("Let me check."),
                Content::call_tool("t1", "clock", json!({"tz": "UTC"})),
                Content::tool_result("t1", json!({"time": "2025-01-01T00:00:00Z"}), false),
                Content::text("It is midnight UTC."),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_tool_input_is_replaced_and_reported() {
        let provider = MockProvider::new(vec![
            vec![MockDelta::Content(Content::call_tool(
                "t1",
                "clock",
                Value::String("notjson".into()),
            ))],
            MockProvider::text_turn(&["Sorry about that."]),
        ]);
        let dispatcher = MockDispatcher::new(vec![("clock", json!({"time": "now"}))]);
        let fixture = fixture(provider, dispatcher);
        let messages = seed(&fixture, "time?");

        fixture.engine.run(&fixture.chat_id, messages).await;

        let assistant = stored_assistant(&fixture);
        let call = assistant.contents[1].as_call_tool().unwrap();
        assert_eq!(call.tool_input, json!({}));
        let result = assistant.contents[2].as_tool_result().unwrap();
        assert!(result.failed);
        assert_eq!(
            result.tool_result,
            json!({"error": "tool input notjson is not valid json"})
        );
        assert_eq!(
            assistant.contents[3],
            Content::text("Sorry about that.")
        );
    }

    #[tokio::test]
    async fn unknown_tool_produces_failed_result_and_reenters_provider() {
        let provider = MockProvider::new(vec![
            vec![MockDelta::Content(Content::call_tool("t1", "ghost", json!({})))],
            MockProvider::text_turn(&["No such tool, then."]),
        ]);
        let fixture = fixture(provider, MockDispatcher::new(vec![]));
        let messages = seed(&fixture, "use ghost");

        fixture.engine.run(&fixture.chat_id, messages).await;

        let assistant = stored_assistant(&fixture);
        let result = assistant.contents[2].as_tool_result().unwrap();
        assert!(result.failed);
        assert_eq!(result.tool_result, json!({"error": "tool ghost is not found"}));
        assert_eq!(
            assistant.contents.last(),
            Some(&Content::text("No such tool, then."))
        );
    }

    #[tokio::test]
    async fn provider_error_is_published_on_the_message_topic() {
        let provider = MockProvider::new(vec![vec![
            MockDelta::Content(Content::text("partial")),
            MockDelta::Error("connection reset".into()),
        ]]);
        let fixture = fixture(provider, MockDispatcher::new(vec![]));
        let messages = seed(&fixture, "Hello");
        let ai_id = messages.last().unwrap().id.clone();

        let mut sub = fixture.broker.subscribe([message_topic(&ai_id)]);
        fixture.engine.run(&fixture.chat_id, messages).await;

        // The partial delta was persisted before the failure.
        assert_eq!(stored_assistant(&fixture).contents, vec![Content::text("partial")]);

        let rendered = sub.rx.try_recv().unwrap();
        assert!(matches!(rendered, Event::Messages(_)));
        assert_eq!(
            sub.rx.try_recv().unwrap(),
            Event::Messages("connection reset".into())
        );
        assert_eq!(sub.rx.try_recv().unwrap(), Event::CloseMessage);
    }

    #[tokio::test]
    async fn resume_interrupted_completes_a_dangling_tool_call() {
        let dispatcher = MockDispatcher::new(vec![("clock", json!({"time": "later"}))]);
        let fixture = fixture(MockProvider::new(vec![]), dispatcher);

        fixture
            .store
            .add_message(&fixture.chat_id, Message::user().with_text("time?"))
            .unwrap();
        fixture
            .store
            .add_message(
                &fixture.chat_id,
                Message::assistant()
                    .with_text("Checking.")
                    .with_call_tool("t9", "clock", json!({"tz": "UTC"})),
            )
            .unwrap();

        fixture.engine.resume_interrupted(&fixture.chat_id).await.unwrap();

        let assistant = stored_assistant(&fixture);
        assert_eq!(
            assistant.contents.last(),
            Some(&Content::tool_result("t9", json!({"time": "later"}), false))
        );

        // Already repaired: a second pass changes nothing.
        fixture.engine.resume_interrupted(&fixture.chat_id).await.unwrap();
        assert_eq!(stored_assistant(&fixture).contents.len(), 3);
    }
}
