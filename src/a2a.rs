//! Agent-to-agent message adapter.
//!
//! Wraps the pipeline in the A2A chat shape: a list of role-tagged messages
//! in, one assistant message out. Also provides the outbound side for
//! asking another agent a question over HTTP.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::pipeline::PipelineController;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default total timeout for outbound requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl A2aMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".into(),
            content: content.to_string(),
            metadata: Map::new(),
        }
    }

    pub fn assistant(content: &str, metadata: Map<String, Value>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.to_string(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aRequest {
    #[serde(default)]
    pub messages: Vec<A2aMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

impl A2aRequest {
    pub fn new(messages: Vec<A2aMessage>) -> Self {
        Self {
            messages,
            tools: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aResponse {
    pub messages: Vec<A2aMessage>,
}

/// Outbound request failures.
#[derive(Debug, Error)]
pub enum A2aError {
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("invalid A2A response: {reason}")]
    InvalidResponse { reason: String },
}

// ─── Inbound ─────────────────────────────────────────────────────────────────

/// Answer an A2A request with the pipeline.
///
/// The first `user` message is the question; its `metadata.context`, if a
/// string, replaces the schema lookup.
pub async fn answer(controller: &PipelineController<'_>, request: &A2aRequest) -> A2aResponse {
    let Some(user) = request.messages.iter().find(|m| m.role == "user") else {
        tracing::warn!("A2A request without a user message");
        return A2aResponse {
            messages: vec![A2aMessage::assistant(
                "Error: No user message found",
                Map::new(),
            )],
        };
    };

    let context = user.metadata.get("context").and_then(Value::as_str);
    tracing::info!(question = %truncate(&user.content, 50), "A2A request received");

    let message = match controller.process(&user.content, context).await {
        Ok(answer) => {
            let mut metadata = Map::new();
            metadata.insert("sql".into(), json!(answer.sql));
            metadata.insert("confidence".into(), json!(answer.confidence));
            metadata.insert("validation".into(), to_value(&answer.validation));
            metadata.insert("agent_insights".into(), to_value(&answer.agent_insights));
            metadata.insert("refinement_info".into(), to_value(&answer.refinement_info));
            A2aMessage::assistant(&answer.answer, metadata)
        }
        Err(failure) => {
            let metadata = match to_value(&failure) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            A2aMessage::assistant(&format!("Error: {}", failure.error), metadata)
        }
    };

    A2aResponse {
        messages: vec![message],
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ─── Outbound ────────────────────────────────────────────────────────────────

/// Send an A2A request to another agent.
pub async fn send_request(
    url: &str,
    request: &A2aRequest,
    timeout: Duration,
) -> Result<A2aResponse, A2aError> {
    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(|e| A2aError::ConnectionFailed {
            endpoint: url.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;
    send_request_with(&http, url, request).await
}

/// Send an A2A request with a caller-supplied HTTP client.
pub async fn send_request_with(
    http: &reqwest::Client,
    url: &str,
    request: &A2aRequest,
) -> Result<A2aResponse, A2aError> {
    tracing::debug!(url, message_count = request.messages.len(), "sending A2A request");

    let response = http.post(url).json(request).send().await.map_err(|e| {
        if e.is_timeout() {
            A2aError::Timeout {
                endpoint: url.to_string(),
            }
        } else {
            A2aError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(A2aError::HttpError {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<A2aResponse>()
        .await
        .map_err(|e| A2aError::InvalidResponse {
            reason: e.to_string(),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
