//! JSON-RPC 2.0 message types.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Generic server error: unauthorized, bad session request, tool failure.
    pub const SERVER_ERROR: i32 = -32000;
    pub const SESSION_NOT_FOUND: i32 = -32001;
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no id and get no response.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    #[must_use]
    pub fn is_initialize(&self) -> bool {
        self.method == "initialize"
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Serialized as `null` when the request id is unknown.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// JSON-RPC version constant.
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Parse a request body into a single JSON-RPC request.
///
/// Invalid JSON yields a `-32700` envelope, well-formed JSON that is not a
/// 2.0 request yields `-32600`. Batches are not supported.
pub fn parse_message(body: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| JsonRpcResponse::error(None, codes::PARSE_ERROR, "Parse error"))?;

    let id = value.get("id").cloned().filter(|id| !id.is_null());

    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|_| JsonRpcResponse::error(id.clone(), codes::INVALID_REQUEST, "Invalid Request"))?;

    if request.jsonrpc != "2.0" {
        return Err(JsonRpcResponse::error(id, codes::INVALID_REQUEST, "Invalid Request: jsonrpc must be \"2.0\""));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let req = parse_message(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert!(!req.is_notification());
    }

    #[test]
    fn test_parse_notification() {
        let req = parse_message(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(req.is_notification());
        assert_eq!(req.params, serde_json::Value::Null);
    }

    #[test]
    fn test_parse_error() {
        let err = parse_message(b"{not json").unwrap_err();
        assert_eq!(err.error.unwrap().code, codes::PARSE_ERROR);
    }

    #[test]
    fn test_invalid_request_keeps_id() {
        let err = parse_message(br#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.id, Some(serde_json::json!(7)));
        assert_eq!(err.error.unwrap().code, codes::INVALID_REQUEST);

        let err = parse_message(br#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, codes::INVALID_REQUEST);
    }

    #[test]
    fn test_error_envelope_has_null_id() {
        let json = serde_json::to_value(JsonRpcResponse::error(None, codes::SERVER_ERROR, "Unauthorized")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"jsonrpc":"2.0","error":{"code":-32000,"message":"Unauthorized"},"id":null})
        );
    }
}
