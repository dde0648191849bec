//! Tool registry.

use super::{Calculator, Clock, Search, SearchConfig, Tool, ToolError};
use crate::model::ToolSpec;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Name-keyed set of tools, built once at startup and read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the calculator, clock, and search tools.
    pub fn standard(search: SearchConfig) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(Calculator)?;
        registry.register(Clock)?;
        registry.register(Search::new(search)?)?;
        Ok(registry)
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.specs.push(tool.spec());
        self.tools.insert(name, Box::new(tool));
        Ok(())
    }

    /// Specifications of all tools, in registration order.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name.
    ///
    /// Unknown names fail with [`ToolError::NotFound`]. Errors raised by the
    /// tool itself come back as `Ok` text starting with `Error:` so the model
    /// can read them.
    pub async fn invoke(&self, name: &str, argument: &str) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!(tool = name, argument, "invoking tool");
        match tool.call(argument).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!(tool = name, error = %e, "tool reported an error");
                Ok(format!("Error: {e}"))
            }
        }
    }
}
