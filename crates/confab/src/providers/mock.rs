use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream;

use super::base::{ContentStream, Provider};
use crate::models::{Content, Message};
use crate::tool::ToolSpec;

/// One scripted item of a mock turn.
#[derive(Debug, Clone)]
pub enum MockDelta {
    Content(Content),
    Error(String),
}

/// A mock provider that plays back pre-configured turns for testing. Each
/// `stream_chat` call consumes the next scripted turn.
pub struct MockProvider {
    turns: Arc<Mutex<VecDeque<Vec<MockDelta>>>>,
    title: String,
}

impl MockProvider {
    pub fn new(turns: Vec<Vec<MockDelta>>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns.into())),
            title: "mock title".to_string(),
        }
    }

    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = title.into();
        self
    }

    /// A turn of plain text deltas.
    pub fn text_turn(deltas: &[&str]) -> Vec<MockDelta> {
        deltas
            .iter()
            .map(|text| MockDelta::Content(Content::text(*text)))
            .collect()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn stream_chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> ContentStream {
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Box::pin(stream::iter(turn.into_iter().map(|delta| match delta {
            MockDelta::Content(content) => Ok(content),
            MockDelta::Error(message) => Err(anyhow!(message)),
        })))
    }

    async fn generate_title(&self, _user_text: &str) -> Result<String> {
        Ok(self.title.clone())
    }
}
