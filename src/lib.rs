pub mod a2a;
pub mod capability;
pub mod config;
pub mod pipeline;

pub use capability::{CapabilityConfig, CapabilityError, CapabilityLink, CapabilityRegistry};
pub use config::{resolve_config, ConfigError, OrchestratorConfig, ResolvedConfig};
pub use pipeline::{PipelineAnswer, PipelineController, PipelineError, PipelineFailure};

use std::path::{Path, PathBuf};

/// Log file name inside the data directory.
pub const LOG_FILE_NAME: &str = "omcp.log";

/// Return the platform-standard data directory for OMCP.
///
/// - macOS: `~/Library/Application Support/omcp/`
/// - Windows: `{FOLDERID_RoamingAppData}\omcp\`
/// - Linux: `$XDG_DATA_HOME/omcp/` (fallback `~/.local/share/omcp/`)
///
/// Falls back to `~/.omcp/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("omcp");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".omcp")
}

/// Initialize the tracing subscriber and return the log file path.
///
/// On each startup:
/// 1. Rotates existing logs (omcp.log → omcp.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh omcp.log with a line-flushing writer.
/// 3. Logs a startup banner with the log file path.
pub fn init_tracing() -> std::io::Result<PathBuf> {
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("omcp=info,warn"));

    file_subscriber(filter, FlushingWriter::new(log_file))
        .try_init()
        .map_err(|e| std::io::Error::other(format!("tracing already initialised: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== OMCP starting ==="
    );

    Ok(log_path)
}

/// Plain-text fmt subscriber for the log file: no ANSI colours, targets on.
fn file_subscriber(
    filter: tracing_subscriber::EnvFilter,
    writer: FlushingWriter,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .finish()
}

/// Rotate log files: `omcp.log` → `omcp.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// each log line is on disk immediately.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
