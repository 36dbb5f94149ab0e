//! Scripted in-memory capability servers for tests.
//!
//! A [`FakeCapability`] speaks the line protocol over a `tokio::io::duplex`
//! pair: it answers discovery, answers tool calls from per-tool responders,
//! and records every request it receives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::link::CapabilityLink;

type JsonResponder = Box<dyn Fn(&Value) -> Value + Send + Sync>;

enum Responder {
    Json(JsonResponder),
    Raw(String),
    HangUp,
}

/// Builder for a scripted capability server.
pub struct FakeCapability {
    tools: Option<Vec<String>>,
    discovery_reply: Option<String>,
    responders: HashMap<String, Responder>,
    delay: Duration,
    discovery_delay: Duration,
}

impl FakeCapability {
    pub fn new() -> Self {
        Self {
            tools: None,
            discovery_reply: None,
            responders: HashMap::new(),
            delay: Duration::ZERO,
            discovery_delay: Duration::ZERO,
        }
    }

    /// Advertise these tools in the discovery reply.
    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = Some(tools.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Answer discovery with this exact line.
    pub fn with_discovery_reply(mut self, line: &str) -> Self {
        self.discovery_reply = Some(line.to_string());
        self
    }

    /// Wait this long before every tool call reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wait this long before the discovery reply only.
    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    /// Answer calls to `tool` with the envelope built from the call parameters.
    pub fn respond<F>(mut self, tool: &str, responder: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.responders
            .insert(tool.to_string(), Responder::Json(Box::new(responder)));
        self
    }

    /// Answer calls to `tool` with a fixed content value.
    pub fn respond_content(self, tool: &str, content: Value) -> Self {
        self.respond(tool, move |_| json!({"results": [{"content": content.clone()}]}))
    }

    /// Answer calls to `tool` with this exact line.
    pub fn respond_raw(mut self, tool: &str, line: &str) -> Self {
        self.responders
            .insert(tool.to_string(), Responder::Raw(line.to_string()));
        self
    }

    /// Close the connection when `tool` is called.
    pub fn hang_up_on(mut self, tool: &str) -> Self {
        self.responders.insert(tool.to_string(), Responder::HangUp);
        self
    }

    fn discovery_line(&self) -> String {
        if let Some(line) = &self.discovery_reply {
            return line.clone();
        }
        match &self.tools {
            Some(tools) => {
                let entries: Vec<Value> = tools.iter().map(|t| json!({"name": t})).collect();
                json!({"tools": entries}).to_string()
            }
            None => json!({"error": "discovery not supported"}).to_string(),
        }
    }

    /// `None` means hang up.
    fn reply_for(&self, request: &Value) -> Option<String> {
        if request.get("command").is_some() {
            return Some(self.discovery_line());
        }
        let call = &request["tool_calls"][0];
        let tool = call["name"].as_str().unwrap_or_default();
        match self.responders.get(tool) {
            Some(Responder::Json(f)) => Some(f(&call["parameters"]).to_string()),
            Some(Responder::Raw(line)) => Some(line.clone()),
            Some(Responder::HangUp) => None,
            None => Some(json!({"error": format!("no responder for {tool}")}).to_string()),
        }
    }
}

/// Everything a fake capability received, in arrival order.
#[derive(Clone, Default)]
pub struct RequestLog {
    entries: Arc<Mutex<Vec<Value>>>,
}

impl RequestLog {
    fn push(&self, request: Value) {
        self.entries.lock().unwrap().push(request);
    }

    /// One label per request: the discovery command or the tool name.
    pub fn lines(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|r| {
                r.get("command")
                    .or_else(|| r.pointer("/tool_calls/0/name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    /// Tool call requests only (discovery excluded).
    pub fn requests(&self) -> Vec<Value> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.get("command").is_none())
            .cloned()
            .collect()
    }

    /// Parameters of every call to `tool`.
    pub fn calls_to(&self, tool: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.pointer("/tool_calls/0/name").and_then(Value::as_str) == Some(tool))
            .map(|r| r["tool_calls"][0]["parameters"].clone())
            .collect()
    }

    /// Number of calls to `tool`.
    pub fn count(&self, tool: &str) -> usize {
        self.calls_to(tool).len()
    }
}

type FakeReader = tokio::io::ReadHalf<tokio::io::DuplexStream>;
type FakeWriter = tokio::io::WriteHalf<tokio::io::DuplexStream>;

/// Serve a fake capability over an in-memory pipe and return the client ends.
pub fn fake_transport(fake: FakeCapability) -> (FakeReader, FakeWriter, RequestLog) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let log = RequestLog::default();

    let server_log = log.clone();
    tokio::spawn(async move {
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut lines = BufReader::new(server_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap_or(Value::Null);
            server_log.push(request.clone());

            let Some(reply) = fake.reply_for(&request) else {
                break;
            };
            let delay = if request.get("command").is_some() {
                fake.discovery_delay
            } else {
                fake.delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if server_write
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    (client_read, client_write, log)
}

/// Start a link wired to a fake capability server.
pub async fn fake_link(name: &str, fake: FakeCapability) -> (CapabilityLink, RequestLog) {
    let (reader, writer, log) = fake_transport(fake);
    let mut link = CapabilityLink::from_transport(name, reader, writer);
    link.start().await;
    (link, log)
}
