//! Current-time tool.

use crate::tools::{Tool, ToolError};
use async_trait::async_trait;
use chrono::Local;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reports the local system time; the argument is ignored.
#[derive(Debug, Default)]
pub struct Clock;

#[async_trait]
impl Tool for Clock {
    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "Returns the current system time."
    }

    async fn call(&self, _argument: &str) -> Result<String, ToolError> {
        Ok(Local::now().format(TIME_FORMAT).to_string())
    }
}
