//! Shared types for the capability layer.
//!
//! Line-delimited JSON envelopes exchanged with capability servers, and the
//! per-capability launch configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Envelope version sent with every request.
pub const PROTOCOL_VERSION: &str = "v1";

/// Command string of the discovery request.
pub const DISCOVER_TOOLS_COMMAND: &str = "discover_tools";

// ─── Requests ───────────────────────────────────────────────────────────────

/// A single named, parameterized invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
}

/// Tool call request envelope: `{"version":"v1","tool_calls":[...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub version: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ToolCallRequest {
    /// Build a request carrying exactly one tool call.
    ///
    /// A `null` parameter value is sent as an empty object.
    pub fn single(name: &str, parameters: serde_json::Value) -> Self {
        let parameters = if parameters.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            parameters
        };
        Self {
            version: PROTOCOL_VERSION.to_string(),
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                parameters,
            }],
        }
    }
}

/// Discovery request envelope: `{"version":"v1","command":"discover_tools"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub version: String,
    pub command: String,
}

impl Default for DiscoveryRequest {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            command: DISCOVER_TOOLS_COMMAND.to_string(),
        }
    }
}

// ─── Responses ──────────────────────────────────────────────────────────────

/// One entry of a tool call response's `results` list.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolResultContent {
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Tool call response: `{"results":[{"content":...}]}` or `{"error":...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallResponse {
    #[serde(default)]
    pub results: Option<Vec<ToolResultContent>>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ToolCallResponse {
    /// The error message, if this is an error envelope.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Content of the first result, if present and non-null.
    pub fn into_first_content(self) -> Option<serde_json::Value> {
        self.results?
            .into_iter()
            .next()
            .map(|r| r.content)
            .filter(|c| !c.is_null())
    }
}

/// Name entry in a discovery response.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
}

/// Discovery response: `{"tools":[{"name":...}, ...]}`. The field is required.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryResponse {
    pub tools: Vec<DiscoveredTool>,
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// How to launch one capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-capability working directory (overrides the global working dir).
    #[serde(default)]
    pub cwd: Option<String>,
}

impl CapabilityConfig {
    /// A config with just a command and its arguments.
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_request_serialization() {
        let req = ToolCallRequest::single(
            "Execute_SQL_Query",
            serde_json::json!({"query": "SELECT 1"}),
        );
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"version":"v1","tool_calls":[{"name":"Execute_SQL_Query","parameters":{"query":"SELECT 1"}}]}"#
        );
    }

    #[test]
    fn test_null_parameters_become_empty_object() {
        let req = ToolCallRequest::single("Get_OMOP_Schema", serde_json::Value::Null);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""parameters":{}"#));
    }

    #[test]
    fn test_discovery_request_serialization() {
        let json = serde_json::to_string(&DiscoveryRequest::default()).unwrap();
        assert_eq!(json, r#"{"version":"v1","command":"discover_tools"}"#);
    }

    #[test]
    fn test_first_content_of_results() {
        let resp: ToolCallResponse = serde_json::from_str(
            r#"{"results":[{"content":"first"},{"content":"second"}]}"#,
        )
        .unwrap();
        assert!(resp.error_message().is_none());
        assert_eq!(resp.into_first_content(), Some(serde_json::json!("first")));
    }

    #[test]
    fn test_empty_and_null_results_have_no_content() {
        let empty: ToolCallResponse = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert!(empty.into_first_content().is_none());

        let null: ToolCallResponse =
            serde_json::from_str(r#"{"results":[{"content":null}]}"#).unwrap();
        assert!(null.into_first_content().is_none());

        let missing: ToolCallResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(missing.into_first_content().is_none());
    }

    #[test]
    fn test_error_envelope() {
        let resp: ToolCallResponse =
            serde_json::from_str(r#"{"error":"no such table"}"#).unwrap();
        assert_eq!(resp.error_message().as_deref(), Some("no such table"));

        let structured: ToolCallResponse =
            serde_json::from_str(r#"{"error":{"code":3}}"#).unwrap();
        assert_eq!(structured.error_message().as_deref(), Some(r#"{"code":3}"#));
    }

    #[test]
    fn test_discovery_response_requires_tools() {
        assert!(serde_json::from_str::<DiscoveryResponse>(r#"{"results":[]}"#).is_err());
        let resp: DiscoveryResponse =
            serde_json::from_str(r#"{"tools":[{"name":"Refine_SQL"}]}"#).unwrap();
        assert_eq!(resp.tools[0].name, "Refine_SQL");
    }

    #[test]
    fn test_capability_config_defaults() {
        let cfg: CapabilityConfig = serde_yaml::from_str("command: python3").unwrap();
        assert!(cfg.args.is_empty());
        assert!(cfg.env.is_empty());
        assert_eq!(cfg.cwd, None);
    }
}
