//! Capability Link: the single channel to one capability server.
//!
//! A link owns the capability process, a request channel, and a background
//! pump task. The pump takes one queued request at a time, writes it to the
//! process, reads exactly one response line, and hands that line back to the
//! caller that queued the request. At most one request is in flight per link,
//! and responses are delivered in submission order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use super::contract;
use super::errors::CapabilityError;
use super::process::CapabilityProcess;
use super::transport::LineTransport;
use super::types::{
    CapabilityConfig, DiscoveryRequest, DiscoveryResponse, ToolCallRequest, ToolCallResponse,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Pause after a transport failure before the pump serves the next request.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Default wait for the discovery reply before falling back to the
/// contract table. A late reply lands in its own abandoned reply slot.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Pump Types ─────────────────────────────────────────────────────────────

/// A queued request line and the slot its response goes to.
struct PendingRequest {
    line: String,
    reply: oneshot::Sender<Result<String, CapabilityError>>,
}

// ─── CapabilityLink ─────────────────────────────────────────────────────────

/// Exclusive communication channel and state owner for one capability.
///
/// The process and transport slots are only accessed through `&mut self`
/// (`Mutex::get_mut`); the link is shared read-only while calls run.
pub struct CapabilityLink {
    name: String,
    process: TokioMutex<Option<CapabilityProcess>>,
    /// Handed to the pump on `start`.
    transport: TokioMutex<Option<LineTransport>>,
    requests: Option<mpsc::UnboundedSender<PendingRequest>>,
    pump: Option<JoinHandle<()>>,
    /// Fixed once discovery completes.
    tools: HashSet<String>,
    running: Arc<AtomicBool>,
    discovery_timeout: Duration,
}

impl CapabilityLink {
    /// Spawn the capability process. The link still has to be started.
    pub fn spawn(
        name: &str,
        config: &CapabilityConfig,
        working_dir: Option<&str>,
    ) -> Result<Self, CapabilityError> {
        let (process, transport) = CapabilityProcess::spawn(name, config, working_dir)?;
        let mut link = Self::detached(name);
        *link.process.get_mut() = Some(process);
        *link.transport.get_mut() = Some(transport);
        Ok(link)
    }

    /// A link over an arbitrary stream pair, with no process to manage.
    pub fn from_transport<R, W>(name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut link = Self::detached(name);
        *link.transport.get_mut() = Some(LineTransport::new(name, reader, writer));
        link
    }

    /// A link with no process at all. Discovery resolves to the capability's
    /// contract table and every call fails with `LinkStopped`.
    pub fn detached(name: &str) -> Self {
        Self {
            name: name.to_string(),
            process: TokioMutex::new(None),
            transport: TokioMutex::new(None),
            requests: None,
            pump: None,
            tools: HashSet::new(),
            running: Arc::new(AtomicBool::new(false)),
            discovery_timeout: DISCOVERY_TIMEOUT,
        }
    }

    /// Override how long `start` waits for the discovery reply.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start the pump task, then discover the capability's tools.
    ///
    /// Discovery never fails startup: any problem falls back to the
    /// capability's contract table.
    pub async fn start(&mut self) {
        if let Some(transport) = self.transport.get_mut().take() {
            let (tx, rx) = mpsc::unbounded_channel();
            self.running.store(true, Ordering::SeqCst);
            self.requests = Some(tx);
            self.pump = Some(tokio::spawn(pump(
                self.name.clone(),
                transport,
                rx,
                Arc::clone(&self.running),
            )));
        }

        self.tools = self.discover_tools().await;
    }

    /// Stop the pump and terminate the process. Never fails.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.requests = None;

        // Aborting the pump drops the transport, which closes the child's
        // stdin and asks it to exit.
        if let Some(pump) = self.pump.take() {
            pump.abort();
            match pump.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::warn!(capability = %self.name, error = %e, "pump task failed");
                }
            }
        }
        *self.transport.get_mut() = None;

        if let Some(mut process) = self.process.get_mut().take() {
            process.terminate().await;
        }

        tracing::info!(capability = %self.name, "stopped capability link");
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    async fn discover_tools(&self) -> HashSet<String> {
        tracing::info!(capability = %self.name, "discovering tools");

        if self.requests.is_none() {
            tracing::warn!(
                capability = %self.name,
                "no process for capability, using contract tools"
            );
            return contract::fallback_tools(&self.name);
        }

        let request = match serde_json::to_string(&DiscoveryRequest::default()) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(capability = %self.name, error = %e, "failed to encode discovery request");
                return contract::fallback_tools(&self.name);
            }
        };

        let response = match tokio::time::timeout(self.discovery_timeout, self.submit(request)).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                tracing::warn!(
                    capability = %self.name,
                    error = %e,
                    "tool discovery failed, using contract tools"
                );
                return contract::fallback_tools(&self.name);
            }
            Err(_) => {
                tracing::warn!(
                    capability = %self.name,
                    timeout_ms = self.discovery_timeout.as_millis() as u64,
                    "tool discovery timed out, using contract tools"
                );
                return contract::fallback_tools(&self.name);
            }
        };

        match serde_json::from_str::<DiscoveryResponse>(&response) {
            Ok(discovered) => {
                let tools: HashSet<String> =
                    discovered.tools.into_iter().map(|t| t.name).collect();
                tracing::info!(
                    capability = %self.name,
                    tools = ?tools,
                    "discovered tools"
                );
                tools
            }
            Err(e) => {
                let tools = contract::fallback_tools(&self.name);
                tracing::warn!(
                    capability = %self.name,
                    error = %e,
                    tools = ?tools,
                    "discovery response unusable, using contract tools"
                );
                tools
            }
        }
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Invoke a tool and return the first result's content.
    ///
    /// Tools outside the discovered set are rejected with `ToolUnavailable`
    /// before anything is sent to the process.
    pub async fn call(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<serde_json::Value, CapabilityError> {
        if !self.tools.contains(tool_name) {
            tracing::warn!(
                capability = %self.name,
                tool = tool_name,
                "tool not available on capability"
            );
            return Err(CapabilityError::ToolUnavailable {
                capability: self.name.clone(),
                tool: tool_name.to_string(),
            });
        }

        let request = ToolCallRequest::single(tool_name, parameters);
        let line = serde_json::to_string(&request).map_err(|e| {
            CapabilityError::MalformedResponse {
                capability: self.name.clone(),
                reason: format!("failed to encode request: {e}"),
            }
        })?;

        tracing::debug!(capability = %self.name, tool = tool_name, "calling tool");
        let response_text = self.submit(line).await?;

        let response: ToolCallResponse = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(
                capability = %self.name,
                tool = tool_name,
                response = %response_text,
                "failed to decode tool response"
            );
            CapabilityError::MalformedResponse {
                capability: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        if let Some(message) = response.error_message() {
            return Err(CapabilityError::ToolError {
                capability: self.name.clone(),
                tool: tool_name.to_string(),
                message,
            });
        }

        response
            .into_first_content()
            .ok_or(CapabilityError::EmptyResult {
                capability: self.name.clone(),
                tool: tool_name.to_string(),
            })
    }

    /// Queue one request line and wait for its response line.
    async fn submit(&self, line: String) -> Result<String, CapabilityError> {
        let stopped = || CapabilityError::LinkStopped {
            name: self.name.clone(),
        };

        let requests = self.requests.as_ref().ok_or_else(stopped)?;
        let (reply, response) = oneshot::channel();
        requests
            .send(PendingRequest { line, reply })
            .map_err(|_| stopped())?;

        response.await.map_err(|_| stopped())?
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Link name (unique key in the registry).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the pump task is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether discovery found this tool.
    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tools.contains(tool_name)
    }

    /// Discovered tool names, sorted.
    pub fn tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().cloned().collect();
        names.sort();
        names
    }
}

// ─── Pump ───────────────────────────────────────────────────────────────────

/// Serve queued requests one at a time until the link stops.
async fn pump(
    name: String,
    mut transport: LineTransport,
    mut requests: mpsc::UnboundedReceiver<PendingRequest>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let Some(request) = requests.recv().await else {
            break;
        };

        match transport.exchange(&request.line).await {
            Ok(response) => {
                let _ = request.reply.send(Ok(response));
            }
            Err(e) => {
                tracing::error!(capability = %name, error = %e, "pump exchange failed");
                let _ = request.reply.send(Err(e));
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    tracing::debug!(capability = %name, "pump stopped");
}

// ─── Tests ───────────────────────────────────────────────────────────────────
