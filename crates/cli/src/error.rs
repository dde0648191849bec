//! CLI error types.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The database file does not exist.
    ///
    /// This typically means no conversation has been started yet.
    #[error("database not found at {path}. Run 'chatbot chat' first")]
    DatabaseNotFound { path: PathBuf },

    /// No thread was found matching the given prefix.
    #[error("no thread found matching '{prefix}'")]
    ThreadNotFound { prefix: String },

    /// Multiple threads match the given prefix.
    ///
    /// The user should provide a longer prefix to disambiguate.
    #[error("multiple threads match '{prefix}': {matches:?}")]
    AmbiguousThread {
        prefix: String,
        matches: Vec<String>,
    },

    /// Configuration is invalid or unreadable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// The model provider could not be set up.
    #[error(transparent)]
    Model(#[from] runtime::ModelError),

    /// The tool set could not be built.
    #[error(transparent)]
    Tool(#[from] runtime::ToolError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
