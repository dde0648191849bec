//! Chatbot runtime: the conversation engine and everything it talks to.
//!
//! # Overview
//!
//! - **Engine**: advances a thread by one turn, persisting the user message,
//!   the final reply, and any tool exchanges in between.
//! - **Backend**: a trait abstracting LLM providers (Gemini, Anthropic).
//! - **ToolRegistry**: the named tools a model may call during a turn.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use runtime::{Engine, ModelConfig, ProviderBackend, SearchConfig, ToolRegistry};
//! use storage::{MessageStore, ThreadId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MessageStore::open("chatbot.db")?);
//! let backend = ProviderBackend::from_config(&ModelConfig::default())?;
//! let tools = Arc::new(ToolRegistry::standard(SearchConfig::default())?);
//!
//! let engine = Engine::new(store, backend, tools);
//! let reply = engine.advance(&ThreadId::generate(), "What is 2+2?").await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
pub mod model;
pub mod providers;
pub mod tools;

pub use engine::{DEFAULT_MAX_TOOL_CALLS, Engine, TurnChunk, TurnStream};
pub use error::{Error, Result};
pub use model::{Backend, ModelConfig, ModelError, Provider};
pub use providers::ProviderBackend;
pub use tools::{SearchConfig, Tool, ToolError, ToolRegistry};
