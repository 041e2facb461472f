//! OpenAI-compatible HTTP oracle client

use crate::*;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, trace};

/// Oracle backed by an OpenAI-compatible chat completions endpoint
pub struct HttpOracle {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl HttpOracle {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let api_base =
            api_base.unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string());
        let default_model =
            default_model.unwrap_or_else(|| "anthropic/claude-sonnet-4".to_string());

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base,
            default_model,
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                let mut obj = json!({ "role": &m.role });
                if let Some(content) = &m.content {
                    obj["content"] = json!(content);
                }
                if let Some(tool_calls) = &m.tool_calls {
                    let calls: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": &c.id,
                                "type": "function",
                                "function": {
                                    "name": &c.name,
                                    "arguments": c.arguments.to_string()
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(calls);
                }
                if let Some(tool_call_id) = &m.tool_call_id {
                    obj["tool_call_id"] = json!(tool_call_id);
                }
                if let Some(name) = &m.name {
                    obj["name"] = json!(name);
                }
                obj
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if !request.signatures.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .signatures
                .iter()
                .map(|s| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": &s.name,
                            "description": &s.description,
                            "parameters": &s.parameters
                        }
                    })
                })
                .collect();

            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }

    fn parse_reply(&self, json: serde_json::Value) -> Result<OracleReply> {
        let choice = json["choices"].get(0).ok_or(OracleError::InvalidReply)?;
        let message = &choice["message"];
        let content = message["content"].as_str().map(|s| s.to_string());

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                // Arguments arrive as a JSON-encoded string on the wire
                let args = function["arguments"]
                    .as_str()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| function["arguments"].clone());

                tool_calls.push(ToolCall {
                    id: call["id"].as_str().unwrap_or("").to_string(),
                    name: function["name"].as_str().unwrap_or("").to_string(),
                    arguments: args,
                });
            }
        }

        Ok(OracleReply {
            content,
            tool_calls,
        })
    }
}

#[async_trait::async_trait]
impl Oracle for HttpOracle {
    async fn complete(&self, request: CompletionRequest) -> Result<OracleReply> {
        if self.api_key.is_empty() {
            return Err(OracleError::NoApiKey);
        }

        trace!("completing against {}", self.api_base);

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request(&request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let json: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let error = json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            if status.as_u16() == 429 {
                return Err(OracleError::RateLimited);
            }
            if status.is_server_error() {
                return Err(OracleError::Unavailable(error));
            }
            return Err(OracleError::Api(error));
        }

        debug!(
            "oracle replied with {} tool calls",
            json["choices"][0]["message"]["tool_calls"]
                .as_array()
                .map(|v| v.len())
                .unwrap_or(0)
        );

        self.parse_reply(json)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}
