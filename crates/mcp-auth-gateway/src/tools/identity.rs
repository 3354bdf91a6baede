//! Caller identity tool: whoami.

use serde_json::json;

use super::{McpTool, ToolContext};
use crate::error::{ToolError, ToolResult};

/// Reports the authenticated caller.
pub struct WhoamiTool;

#[async_trait::async_trait]
impl McpTool for WhoamiTool {
    fn name(&self) -> &'static str {
        "whoami"
    }

    fn description(&self) -> &'static str {
        "Return the user, client and scopes of the access token used for this call."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
        let auth = ctx.auth.as_ref().ok_or(ToolError::Unauthenticated)?;

        let body = json!({
            "user_id": auth.user_id,
            "client_id": auth.client_id,
            "scopes": auth.scopes,
            "expires_at": auth.expires_at,
            "audience": auth.audience,
            "session_id": ctx.session_id,
        });
        Ok(serde_json::to_string_pretty(&body)?)
    }
}
