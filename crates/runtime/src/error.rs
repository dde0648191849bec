use crate::model::ModelError;
use storage::ThreadId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage unavailable during {operation} on thread {thread_id}: {source}")]
    StorageUnavailable {
        thread_id: ThreadId,
        operation: &'static str,
        #[source]
        source: storage::Error,
    },

    #[error("inference failed on thread {thread_id}: {source}")]
    InferenceFailed {
        thread_id: ThreadId,
        #[source]
        source: ModelError,
    },

    #[error("thread {thread_id} exceeded {limit} chained tool calls")]
    ToolLoopExceeded { thread_id: ThreadId, limit: usize },

    #[error("thread {thread_id} already has a turn in progress")]
    ThreadBusy { thread_id: ThreadId },
}

impl Error {
    /// Whether retrying the same turn later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ThreadBusy { .. } | Self::InferenceFailed { .. } | Self::StorageUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
