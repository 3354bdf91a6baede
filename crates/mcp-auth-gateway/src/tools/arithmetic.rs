//! Arithmetic tools: double.

use serde::Deserialize;
use serde_json::json;

use super::{McpTool, ToolContext};
use crate::error::{ToolError, ToolResult};

/// Input for the double tool.
#[derive(Debug, Clone, Deserialize)]
pub struct DoubleInput {
    /// Number to double.
    pub value: serde_json::Number,
}

/// Doubles a number.
pub struct DoubleTool;

#[async_trait::async_trait]
impl McpTool for DoubleTool {
    fn name(&self) -> &'static str {
        "double"
    }

    fn description(&self) -> &'static str {
        "Double a number."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "value": {
                    "type": "number",
                    "description": "Number to double"
                }
            },
            "required": ["value"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: DoubleInput = serde_json::from_value(input)?;

        // Integers stay integers unless doubling overflows.
        if let Some(n) = params.value.as_i64().and_then(|n| n.checked_mul(2)) {
            return Ok(n.to_string());
        }
        let value = params
            .value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ToolError::validation("value", "must be a finite number"))?;

        Ok((value * 2.0).to_string())
    }
}
