//! Scripted model provider for offline development and tests.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;

use super::{ChatStreamRequest, ModelEvent, ModelProvider, ModelStream};

/// One scripted turn of the mock provider.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Emit these events in order, then end the stream.
    Events(Vec<ModelEvent>),
    /// Emit these events, then fail the stream with the given message.
    ErrorAfter(Vec<ModelEvent>, String),
}

/// A [`ModelProvider`] that replays scripted turns.
///
/// Used by the test suites and as the `mock` provider in local development,
/// where it answers every turn with a canned reply.
pub struct MockProvider {
    turns: Mutex<Vec<MockTurn>>,
    completion: String,
}

impl MockProvider {
    /// A provider that replays `turns` front to back, then falls back to the
    /// canned reply.
    pub fn scripted(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Mutex::new(turns),
            completion: "Mock title".to_string(),
        }
    }

    /// A provider that always streams the same reply.
    pub fn canned() -> Self {
        Self::scripted(Vec::new())
    }

    /// Override the non-streaming completion text (titles).
    pub fn with_completion(mut self, completion: impl Into<String>) -> Self {
        self.completion = completion.into();
        self
    }

    fn next_turn(&self) -> MockTurn {
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            MockTurn::Events(vec![
                ModelEvent::TextDelta("This is a mock reply.".to_string()),
                ModelEvent::Finish,
            ])
        } else {
            turns.remove(0)
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn stream_chat(&self, _request: ChatStreamRequest) -> Result<ModelStream> {
        let items: Vec<Result<ModelEvent>> = match self.next_turn() {
            MockTurn::Events(events) => events.into_iter().map(Ok).collect(),
            MockTurn::ErrorAfter(events, message) => {
                let mut items: Vec<Result<ModelEvent>> =
                    events.into_iter().map(Ok).collect();
                items.push(Err(anyhow::anyhow!(message)));
                items
            }
        };
        Ok(futures::stream::iter(items).boxed())
    }

    async fn complete(&self, _model: &str, _system_prompt: &str, _prompt: &str) -> Result<String> {
        Ok(self.completion.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatStreamRequest {
        ChatStreamRequest {
            model: "mock".to_string(),
            system_prompt: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_turns_replay_in_order() {
        let provider = MockProvider::scripted(vec![MockTurn::Events(vec![
            ModelEvent::TextDelta("a".to_string()),
            ModelEvent::Finish,
        ])]);

        let mut stream = provider.stream_chat(request()).await.unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ModelEvent::TextDelta("a".to_string())
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), ModelEvent::Finish);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_script_falls_back_to_canned_reply() {
        let provider = MockProvider::canned();
        let mut stream = provider.stream_chat(request()).await.unwrap();
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            ModelEvent::TextDelta(_)
        ));
    }
}
