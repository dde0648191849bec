//! Language model boundary: request/response types and the backend trait.

pub mod config;
pub mod errors;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use config::{ModelConfig, Provider};
pub use errors::ModelError;
pub use types::{
    Backend, ChunkStream, ModelChunk, ModelRequest, ModelResponse, ToolSpec, Usage,
    argument_from_json, argument_to_json, usable_reply,
};
