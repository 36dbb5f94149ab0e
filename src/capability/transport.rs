//! Line-delimited transport over a capability's stdio.
//!
//! One JSON object per line in each direction. The transport does not
//! interpret the lines; it only guarantees that one written line is answered
//! by the next non-blank line read back.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::errors::CapabilityError;

type LineReader = Box<dyn tokio::io::AsyncBufRead + Send + Unpin>;
type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bi-directional line transport, normally over a child process's stdin/stdout.
pub struct LineTransport {
    capability: String,
    writer: LineWriter,
    reader: LineReader,
}

impl LineTransport {
    /// Create a transport from any reader/writer pair.
    pub fn new<R, W>(capability: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            capability: capability.to_string(),
            writer: Box::new(writer),
            reader: Box::new(BufReader::new(reader)),
        }
    }

    /// Name of the capability on the other end.
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Write one line, flush, and read back exactly one response line.
    ///
    /// Blank lines on the way back are skipped. The returned line is trimmed.
    pub async fn exchange(&mut self, line: &str) -> Result<String, CapabilityError> {
        self.send_line(line).await?;
        self.read_line().await
    }

    async fn send_line(&mut self, line: &str) -> Result<(), CapabilityError> {
        let mut payload = String::with_capacity(line.len() + 1);
        payload.push_str(line.trim_end_matches('\n'));
        payload.push('\n');

        self.writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }

    async fn read_line(&mut self) -> Result<String, CapabilityError> {
        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(
                    self.transport_error("stdout closed (process may have exited)".into())
                );
            }

            let trimmed = line_buf.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    fn transport_error(&self, reason: String) -> CapabilityError {
        CapabilityError::TransportError {
            capability: self.capability.clone(),
            reason,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_exchange_writes_one_line_and_reads_one_line() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        let mut transport = LineTransport::new("sql", client_read, client_write);

        let server_task = tokio::spawn(async move {
            let mut reader = BufReader::new(server_read);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            server_write.write_all(b"\n{\"results\":[]}\n").await.unwrap();
            line
        });

        let response = transport.exchange("{\"ping\":1}").await.unwrap();
        assert_eq!(response, "{\"results\":[]}");

        let received = server_task.await.unwrap();
        assert_eq!(received, "{\"ping\":1}\n");
    }

    #[tokio::test]
    async fn test_exchange_reports_closed_peer() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        drop(server);

        let mut transport = LineTransport::new("ollama", client_read, client_write);

        let err = transport.exchange("{}").await.unwrap_err();
        match err {
            CapabilityError::TransportError { capability, .. } => {
                assert_eq!(capability, "ollama");
            }
            other => panic!("expected TransportError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_reports_eof_after_write() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);

        let mut transport = LineTransport::new("sql", client_read, client_write);

        // Peer reads the request, then goes away without answering.
        let peer = tokio::spawn(async move {
            let mut server = server;
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await;
        });

        let err = transport.exchange("{}").await.unwrap_err();
        assert!(matches!(err, CapabilityError::TransportError { .. }));
        peer.await.unwrap();
    }
}
