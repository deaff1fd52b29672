use std::sync::Arc;

use confab::broker::EventBroker;
use confab::engine::ConversationEngine;
use confab::providers::base::Provider;
use confab::registry::ToolRegistry;
use confab::store::MessageStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub registry: Arc<ToolRegistry>,
    pub broker: Arc<EventBroker>,
    pub engine: Arc<ConversationEngine>,
    pub title_provider: Arc<dyn Provider>,
}

impl AppState {
    pub fn new(
        store: Arc<MessageStore>,
        registry: Arc<ToolRegistry>,
        broker: Arc<EventBroker>,
        provider: Arc<dyn Provider>,
        title_provider: Arc<dyn Provider>,
    ) -> Self {
        let engine = Arc::new(ConversationEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry) as Arc<dyn confab::registry::ToolDispatcher>,
            Arc::clone(&broker),
            provider,
        ));
        Self {
            store,
            registry,
            broker,
            engine,
            title_provider,
        }
    }
}
