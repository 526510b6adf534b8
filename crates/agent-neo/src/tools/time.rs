use std::future::ready;

use agent_neo_core::tool::{Tool, ToolResult};
use chrono::{DateTime, Local, TimeZone};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

const TIME_FORMAT: &str = "%A, %d %B %Y, %H:%M:%S";

/// The tool takes no arguments.
#[derive(Deserialize, JsonSchema)]
pub struct CurrentTimeParameters {}

/// A tool that tells the local date and time.
pub struct CurrentTimeTool {
    parameter_schema: Value,
}

impl CurrentTimeTool {
    /// Creates a new current time tool.
    #[inline]
    pub fn new() -> Self {
        CurrentTimeTool {
            parameter_schema: schema_for!(CurrentTimeParameters).to_value(),
        }
    }
}

impl Default for CurrentTimeTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CurrentTimeTool {
    type Input = CurrentTimeParameters;

    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Return the current local date and time."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        _input: CurrentTimeParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(format_time(&Local::now())))
    }
}

fn format_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use super::*;

    #[test]
    fn test_format_time() {
        let time = Utc.with_ymd_and_hms(2026, 3, 7, 9, 5, 30).unwrap();
        assert_eq!(format_time(&time), "Saturday, 07 March 2026, 09:05:30");

        let offset = FixedOffset::east_opt(9 * 3600).unwrap();
        let time = offset.with_ymd_and_hms(2025, 12, 31, 23, 59, 1).unwrap();
        assert_eq!(format_time(&time), "Wednesday, 31 December 2025, 23:59:01");
    }

    #[test]
    fn test_schema_is_object() {
        let tool = CurrentTimeTool::new();
        assert_eq!(tool.parameter_schema()["type"], "object");
    }

    #[tokio::test]
    async fn test_execute_accepts_empty_arguments() {
        let tool = CurrentTimeTool::new();
        let input = serde_json::from_value(serde_json::json!({})).unwrap();
        let text = tool.execute(input).await.unwrap();
        assert_eq!(text.matches(", ").count(), 2, "{text}");
    }
}
