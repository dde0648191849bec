//! Tools the model may invoke during a turn.

mod calculator;
mod clock;
pub mod errors;
mod registry;
mod search;
mod tool;

pub use calculator::{Calculator, evaluate};
pub use clock::Clock;
pub use errors::ToolError;
pub use registry::ToolRegistry;
pub use search::{DEFAULT_MAX_RESULTS, Search, SearchConfig, SearchResult};
pub use tool::Tool;
