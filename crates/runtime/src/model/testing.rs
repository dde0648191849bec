//! Scripted backend for exercising the engine without a provider.

use super::{Backend, ChunkStream, ModelChunk, ModelError, ModelRequest, ModelResponse, Usage};
use futures::StreamExt;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Mutex;
use storage::Message;

/// Replays a fixed queue of replies and records every request it saw.
pub(crate) struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Message, ModelError>>>,
    repeat: Option<Message>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub(crate) fn new(replies: impl IntoIterator<Item = Result<Message, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(replies: impl IntoIterator<Item = Message>) -> Self {
        Self::new(replies.into_iter().map(Ok))
    }

    /// A backend that answers every request with the same message.
    pub(crate) fn always(message: Message) -> Self {
        Self {
            repeat: Some(message),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: ModelRequest<'_>) -> Result<Message, ModelError> {
        self.requests.lock().unwrap().push(request.messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| ModelError::InvalidResponse("script exhausted".into())),
        }
    }
}

impl Backend for ScriptedBackend {
    async fn infer(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let message = self.next_reply(request)?;
        Ok(ModelResponse {
            message,
            usage: Usage::default(),
        })
    }

    /// Streams the reply one word at a time, with any tool call last.
    async fn stream(&self, request: ModelRequest<'_>) -> Result<ChunkStream, ModelError> {
        let message = self.next_reply(request)?;
        let mut chunks: Vec<Result<ModelChunk, ModelError>> = message
            .content
            .split_inclusive(' ')
            .map(|word| Ok(ModelChunk::text(word)))
            .collect();
        if let Some(call) = message.tool_call {
            chunks.push(Ok(ModelChunk {
                text: String::new(),
                tool_call: Some(call),
            }));
        }
        Ok(stream::iter(chunks).boxed())
    }
}
