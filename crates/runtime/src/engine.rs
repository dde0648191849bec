//! Conversation engine.
//!
//! One call to [`Engine::advance`] is one turn: the user message is persisted,
//! the model is consulted (running tools in between when it asks for them),
//! and the final reply is persisted. Everything the turn produces after the
//! user message is committed in a single batch, so a failed or abandoned turn
//! leaves exactly the user message behind.

use crate::model::{Backend, ChunkStream, ModelError, ModelRequest, Usage, usable_reply};
use crate::tools::ToolRegistry;
use crate::{Error, Result};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use storage::{Message, MessageStore, Role, ThreadId, ToolCall};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

/// Chained tool calls allowed in one turn before it is abandoned.
pub const DEFAULT_MAX_TOOL_CALLS: usize = 5;

/// One item of a streamed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnChunk {
    /// Reply text as it arrives.
    Delta(String),
    /// The final reply, yielded once it has been persisted.
    Complete(Message),
}

pub type TurnStream<'a> = BoxStream<'a, Result<TurnChunk>>;

/// Drives turns for any number of threads over a shared store.
pub struct Engine<B> {
    store: Arc<MessageStore>,
    backend: B,
    tools: Arc<ToolRegistry>,
    system: Option<String>,
    max_tool_calls: usize,
    tools_enabled: bool,
    turns: TurnLocks,
}

impl<B: Backend> Engine<B> {
    pub fn new(store: Arc<MessageStore>, backend: B, tools: Arc<ToolRegistry>) -> Self {
        Self {
            store,
            backend,
            tools,
            system: None,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            tools_enabled: true,
            turns: TurnLocks::default(),
        }
    }

    /// Set the system prompt sent with every request.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tool_calls(mut self, limit: usize) -> Self {
        self.max_tool_calls = limit;
        self
    }

    /// Stop offering tools to the model.
    pub fn without_tools(mut self) -> Self {
        self.tools_enabled = false;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stored history of a thread, oldest first.
    pub fn history(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        self.store
            .load(thread_id)
            .map_err(|source| storage_error(thread_id, "load", source))
    }

    /// Run one turn and return the final assistant reply.
    pub async fn advance(&self, thread_id: &ThreadId, user_message: &str) -> Result<Message> {
        let _guard = self.turns.acquire(thread_id)?;
        let mut turn = self.begin(thread_id, user_message)?;

        loop {
            let response = self
                .backend
                .infer(self.request(&turn))
                .await
                .map_err(|source| turn.inference_failed(source))?;
            turn.usage.add(response.usage);
            let reply = response
                .into_usable()
                .map_err(|source| turn.inference_failed(source))?;

            if let Some(reply) = self.resolve(&mut turn, reply).await? {
                return Ok(reply);
            }
        }
    }

    /// Run one turn, yielding reply text as it arrives.
    ///
    /// The returned stream holds the thread for as long as it lives. Dropping
    /// it before [`TurnChunk::Complete`] abandons the turn without storing
    /// anything beyond the user message.
    pub async fn advance_streaming(
        &self,
        thread_id: &ThreadId,
        user_message: &str,
    ) -> Result<TurnStream<'_>> {
        let guard = self.turns.acquire(thread_id)?;
        let turn = self.begin(thread_id, user_message)?;
        let state = StreamState {
            turn,
            _guard: guard,
            inner: None,
            text: String::new(),
            tool_call: None,
            finished: false,
        };

        Ok(stream::try_unfold(state, move |state| self.next_chunk(state)).boxed())
    }

    fn begin(&self, thread_id: &ThreadId, user_message: &str) -> Result<Turn> {
        let mut history = self.history(thread_id)?;
        let user = Message::user(user_message);
        self.store
            .append(thread_id, &user)
            .map_err(|source| storage_error(thread_id, "append", source))?;
        history.push(user);

        Ok(Turn {
            thread_id: thread_id.clone(),
            history,
            pending: Vec::new(),
            tool_calls: 0,
            usage: Usage::default(),
        })
    }

    fn request<'a>(&'a self, turn: &'a Turn) -> ModelRequest<'a> {
        ModelRequest {
            messages: &turn.history,
            tools: if self.tools_enabled {
                self.tools.specs()
            } else {
                &[]
            },
            system: self.system.as_deref(),
        }
    }

    /// Act on a model reply. Returns the reply once the turn is committed,
    /// or `None` after running a requested tool.
    async fn resolve(&self, turn: &mut Turn, reply: Message) -> Result<Option<Message>> {
        let Some(call) = reply.tool_call.clone() else {
            turn.pending.push(reply.clone());
            self.store
                .append_all(&turn.thread_id, &turn.pending)
                .map_err(|source| storage_error(&turn.thread_id, "append", source))?;
            info!(
                thread_id = %turn.thread_id,
                tool_calls = turn.tool_calls,
                stored = turn.pending.len() + 1,
                input_tokens = turn.usage.input_tokens,
                output_tokens = turn.usage.output_tokens,
                "turn complete"
            );
            return Ok(Some(reply));
        };

        if !self.tools_enabled {
            return Err(turn.inference_failed(ModelError::InvalidResponse(format!(
                "model called `{}` but tools are disabled",
                call.name
            ))));
        }
        if turn.tool_calls >= self.max_tool_calls {
            warn!(thread_id = %turn.thread_id, limit = self.max_tool_calls, "tool loop limit reached");
            return Err(Error::ToolLoopExceeded {
                thread_id: turn.thread_id.clone(),
                limit: self.max_tool_calls,
            });
        }
        turn.tool_calls += 1;

        let output = self.run_tool(&call).await;
        turn.record(reply);
        turn.record(Message::tool_result(call, output));
        Ok(None)
    }

    async fn run_tool(&self, call: &ToolCall) -> String {
        match self.tools.invoke(&call.name, &call.argument).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                format!("Error: {e}")
            }
        }
    }

    async fn next_chunk(&self, mut state: StreamState) -> Result<Option<(TurnChunk, StreamState)>> {
        loop {
            if state.finished {
                return Ok(None);
            }

            let mut inner = match state.inner.take() {
                Some(inner) => inner,
                None => self
                    .backend
                    .stream(self.request(&state.turn))
                    .await
                    .map_err(|source| state.turn.inference_failed(source))?,
            };

            match inner.next().await {
                Some(Ok(chunk)) => {
                    state.inner = Some(inner);
                    if state.tool_call.is_none() {
                        state.tool_call = chunk.tool_call;
                    }
                    if !chunk.text.is_empty() {
                        state.text.push_str(&chunk.text);
                        return Ok(Some((TurnChunk::Delta(chunk.text), state)));
                    }
                }
                Some(Err(source)) => return Err(state.turn.inference_failed(source)),
                None => {
                    let reply = usable_reply(Message {
                        role: Role::Assistant,
                        content: std::mem::take(&mut state.text),
                        tool_call: state.tool_call.take(),
                    })
                    .map_err(|source| state.turn.inference_failed(source))?;

                    if let Some(reply) = self.resolve(&mut state.turn, reply).await? {
                        state.finished = true;
                        return Ok(Some((TurnChunk::Complete(reply), state)));
                    }
                }
            }
        }
    }
}

/// Working state of one turn.
struct Turn {
    thread_id: ThreadId,
    /// Everything the model sees: stored history plus this turn so far.
    history: Vec<Message>,
    /// Produced after the user message and not yet committed.
    pending: Vec<Message>,
    tool_calls: usize,
    /// Token usage reported by the provider; streamed replies report none.
    usage: Usage,
}

impl Turn {
    fn record(&mut self, message: Message) {
        self.history.push(message.clone());
        self.pending.push(message);
    }

    fn inference_failed(&self, source: ModelError) -> Error {
        warn!(thread_id = %self.thread_id, error = %source, "inference failed");
        Error::InferenceFailed {
            thread_id: self.thread_id.clone(),
            source,
        }
    }
}

struct StreamState {
    turn: Turn,
    _guard: OwnedMutexGuard<()>,
    inner: Option<ChunkStream>,
    text: String,
    tool_call: Option<ToolCall>,
    finished: bool,
}

fn storage_error(thread_id: &ThreadId, operation: &'static str, source: storage::Error) -> Error {
    error!(thread_id = %thread_id, operation, error = %source, "storage failure");
    Error::StorageUnavailable {
        thread_id: thread_id.clone(),
        operation,
        source,
    }
}

/// At most one turn per thread; turns on different threads run freely.
#[derive(Default)]
struct TurnLocks {
    threads: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnLocks {
    fn acquire(&self, thread_id: &ThreadId) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            // Idle entries are only referenced by the map.
            threads.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(threads.entry(thread_id.clone()).or_default())
        };
        lock.try_lock_owned().map_err(|_| Error::ThreadBusy {
            thread_id: thread_id.clone(),
        })
    }
}
