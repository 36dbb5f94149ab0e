//! Capability layer error types.

use thiserror::Error;

/// Errors that can occur while talking to a capability server.
///
/// Only `SpawnFailed` surfaces during startup. Everything
/// else is what a single `call` can yield; the pipeline treats all of those
/// as "no usable result".
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A capability process failed to start.
    #[error("failed to spawn capability '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// Line I/O with the capability process failed (broken pipe, EOF).
    #[error("transport error for capability '{capability}': {reason}")]
    TransportError {
        capability: String,
        reason: String,
    },

    /// The tool is not in the link's discovered tool set. Nothing was sent.
    #[error("tool '{tool}' not available on capability '{capability}'")]
    ToolUnavailable {
        capability: String,
        tool: String,
    },

    /// The response line could not be decoded.
    #[error("malformed response from capability '{capability}': {reason}")]
    MalformedResponse {
        capability: String,
        reason: String,
    },

    /// The capability answered with an `error` envelope.
    #[error("tool '{tool}' on capability '{capability}' failed: {message}")]
    ToolError {
        capability: String,
        tool: String,
        message: String,
    },

    /// The response carried no result content.
    #[error("tool '{tool}' on capability '{capability}' returned no result")]
    EmptyResult {
        capability: String,
        tool: String,
    },

    /// The link has been stopped (or never had a process).
    #[error("capability '{name}' is not running")]
    LinkStopped {
        name: String,
    },
}

impl CapabilityError {
    /// Whether the error came from a missing or unusable result rather than
    /// a broken link.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ToolUnavailable { .. }
                | Self::MalformedResponse { .. }
                | Self::ToolError { .. }
                | Self::EmptyResult { .. }
        )
    }
}
