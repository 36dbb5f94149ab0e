//! Capability process lifecycle.
//!
//! Spawns a capability server as a child process with piped stdio and shuts
//! it down again: graceful exit first, forced kill after the grace period.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::errors::CapabilityError;
use super::transport::LineTransport;
use super::types::CapabilityConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long `terminate` waits for a graceful exit before killing.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ─── CapabilityProcess ──────────────────────────────────────────────────────

/// A running capability server process.
///
/// The stdio pipes are handed to a [`LineTransport`] at spawn time; this
/// handle only owns the process itself.
pub struct CapabilityProcess {
    name: String,
    child: Child,
}

impl CapabilityProcess {
    /// Launch a capability server and return it with a transport over its stdio.
    pub fn spawn(
        name: &str,
        config: &CapabilityConfig,
        working_dir: Option<&str>,
    ) -> Result<(Self, LineTransport), CapabilityError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        // Per-capability cwd overrides the global working_dir
        if let Some(dir) = config.cwd.as_deref().or(working_dir) {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| CapabilityError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{e}"),
        })?;

        let stdin = child.stdin.take().ok_or(CapabilityError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;

        let stdout = child.stdout.take().ok_or(CapabilityError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(name.to_string(), stderr));
        }

        tracing::info!(
            capability = name,
            command = %config.command,
            pid = child.id(),
            "spawned capability process"
        );

        let transport = LineTransport::new(name, stdout, stdin);

        Ok((
            Self {
                name: name.to_string(),
                child,
            },
            transport,
        ))
    }

    /// Capability name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check whether the process has exited.
    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => false,
            Ok(Some(_)) => true,
            Err(_) => true,
        }
    }

    /// Ask the process to exit, wait up to [`SHUTDOWN_GRACE`], then kill it.
    ///
    /// On Unix the request is a SIGTERM. Callers also close the process's
    /// stdin (by dropping its transport) beforehand, which is the only
    /// request on other platforms. Never fails; errors are logged.
    pub async fn terminate(&mut self) {
        self.terminate_within(SHUTDOWN_GRACE).await;
    }

    /// [`terminate`](Self::terminate) with an explicit grace period.
    pub async fn terminate_within(&mut self, grace: Duration) {
        self.request_shutdown().await;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(capability = %self.name, %status, "capability process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    capability = %self.name,
                    error = %e,
                    "failed to wait for capability process, killing"
                );
                self.kill().await;
            }
            Err(_) => {
                tracing::warn!(
                    capability = %self.name,
                    grace_ms = grace.as_millis() as u64,
                    "capability process did not exit within grace period, killing"
                );
                self.kill().await;
            }
        }
    }

    /// Send SIGTERM on Unix. A no-op once the process has exited.
    async fn request_shutdown(&mut self) {
        if self.has_exited() {
            return;
        }

        #[cfg(unix)]
        {
            let Some(pid) = self.child.id() else {
                return;
            };
            match Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .output()
                .await
            {
                Ok(output) if output.status.success() => {
                    tracing::debug!(capability = %self.name, pid, "sent SIGTERM");
                }
                Ok(output) => {
                    tracing::debug!(
                        capability = %self.name,
                        pid,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "SIGTERM not delivered"
                    );
                }
                Err(e) => {
                    tracing::warn!(capability = %self.name, error = %e, "failed to run kill");
                }
            }
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::error!(
                capability = %self.name,
                error = %e,
                "failed to kill capability process"
            );
        }
    }
}

/// Drain a capability's stderr into the log so the pipe never fills up.
async fn forward_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(capability = %name, stderr = %line, "capability stderr");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(capability = %name, error = %e, "capability stderr closed");
                break;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
