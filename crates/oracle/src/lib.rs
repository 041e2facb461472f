//! Oracle boundary for relay
//!
//! The oracle is the external reasoning service that, given conversation
//! history and declared tool signatures, returns either a final answer or a
//! batch of tool invocation requests. The engine only sees the [`Oracle`]
//! trait; the HTTP client in [`http`] is one implementation of it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod http;

pub use http::HttpOracle;

/// Oracle interaction errors
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("oracle rejected request: {0}")]
    Api(String),

    #[error("no api key configured")]
    NoApiKey,

    #[error("malformed oracle reply")]
    InvalidReply,

    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited")]
    RateLimited,
}

impl OracleError {
    /// Whether the failure is worth an automatic retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OracleError::Request(_) | OracleError::Unavailable(_) | OracleError::RateLimited
        )
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;

/// A tool invocation requested by the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A declared tool: name, human description, JSON schema of parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSignature {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSignature {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// One conversation turn sent to the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Assistant turn carrying tool invocation requests
    pub fn assistant_with_calls(content: Option<&str>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.map(|c| c.to_string()),
            tool_calls: Some(calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Tool result turn answering a specific call id
    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(result.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// Oracle reply: final answer, tool calls, or both (content accompanying calls)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleReply {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl OracleReply {
    /// A reply with no tool calls ends the iteration loop
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }

    pub fn final_answer(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    pub fn final_text(&self) -> String {
        self.content
            .clone()
            .unwrap_or_else(|| "Task completed.".to_string())
    }
}

/// One completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub signatures: Vec<ToolSignature>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            signatures: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// The external reasoning service
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<OracleReply>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

/// Build a flat string-typed JSON object schema
pub fn object_schema(properties: Vec<(String, String, bool)>) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, description, is_required) in properties {
        props.insert(
            name.clone(),
            serde_json::json!({
                "type": "string",
                "description": description
            }),
        );
        if is_required {
            required.push(name);
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_final() {
        let reply = OracleReply::final_answer("done");
        assert!(reply.is_final());
        assert_eq!(reply.final_text(), "done");
    }

    #[test]
    fn test_reply_with_calls_is_not_final() {
        let reply = OracleReply::calls(vec![ToolCall::new("c1", "write_file", json!({}))]);
        assert!(!reply.is_final());
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "write_file");
    }

    #[test]
    fn test_reply_final_text_fallback() {
        let reply = OracleReply {
            content: None,
            tool_calls: Vec::new(),
        };
        assert_eq!(reply.final_text(), "Task completed.");
    }

    #[test]
    fn test_message_builders() {
        let msg = Message::system("prompt");
        assert_eq!(msg.role, "system");
        assert_eq!(msg.content.as_deref(), Some("prompt"));

        let msg = Message::tool("call_1", "exec", "ok");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("exec"));

        let msg = Message::assistant_with_calls(None, vec![ToolCall::new("c", "t", json!({}))]);
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_message_serialization_skips_none() {
        let msg = Message::user("hi");
        let json_str = serde_json::to_string(&msg).unwrap();
        assert!(json_str.contains("\"role\":\"user\""));
        assert!(!json_str.contains("tool_call_id"));
    }

    #[test]
    fn test_reply_deserializes_without_calls_field() {
        let reply: OracleReply = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert!(reply.is_final());
    }

    #[test]
    fn test_completion_request_defaults() {
        let req = CompletionRequest::default();
        assert_eq!(req.max_tokens, 4096);
        assert!(req.messages.is_empty());
        assert!(req.signatures.is_empty());
    }

    #[test]
    fn test_error_transience() {
        assert!(OracleError::RateLimited.is_transient());
        assert!(OracleError::Unavailable("down".into()).is_transient());
        assert!(!OracleError::NoApiKey.is_transient());
        assert!(!OracleError::Api("bad request".into()).is_transient());
    }

    #[test]
    fn test_object_schema() {
        let schema = object_schema(vec![
            ("path".to_string(), "File path".to_string(), true),
            ("content".to_string(), "File content".to_string(), false),
        ]);

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "path");
    }
}
