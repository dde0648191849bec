//! SQLite-backed conversation storage.
//!
//! This crate persists the message history of every chat thread. A thread
//! is an independent conversation identified by an opaque [`ThreadId`]; its
//! messages form an append-only log whose order is the order fed to the
//! model.
//!
//! # Core Concepts
//!
//! ## MessageStore
//!
//! The [`MessageStore`] wraps a SQLite database. Appends are durable before
//! they return and a batch append commits atomically, which is what lets the
//! runtime record a whole assistant turn or nothing at all.
//!
//! ## Checkpoints
//!
//! Each thread row carries a checkpoint marker: the sequence number of the
//! last committed message. After a restart, [`MessageStore::list_threads`]
//! and [`MessageStore::load`] return exactly what was committed before.
//!
//! # Example
//!
//! ```no_run
//! use storage::{Message, MessageStore, ThreadId};
//!
//! let store = MessageStore::open("chatbot.db")?;
//! let thread = ThreadId::generate();
//!
//! store.append(&thread, &Message::user("Hello"))?;
//! store.append(&thread, &Message::assistant("Hi there"))?;
//!
//! for message in store.load(&thread)? {
//!     println!("{:?}: {}", message.role, message.content);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod message;
mod store;

pub use error::{Error, Result};
pub use message::{Message, Role, StoredMessage, ThreadId, ThreadSummary, ToolCall};
pub use store::MessageStore;
