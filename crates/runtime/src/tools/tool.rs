//! Tool trait.

use crate::model::ToolSpec;
use crate::tools::ToolError;
use async_trait::async_trait;

/// A named capability the model may invoke with a single string argument.
///
/// This is the boundary between the conversation loop and side effects.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run the tool.
    async fn call(&self, argument: &str) -> Result<String, ToolError>;

    /// Specification advertised to the model.
    fn spec(&self) -> ToolSpec {
        ToolSpec::single_input(self.name(), self.description())
    }
}
