//! Capability server auto-discovery: scan a servers directory and build
//! launch configs from naming conventions.
//!
//! - `sql_server.py` → capability `sql`, run with the Python interpreter
//! - `sql_server` / `sql-server` (no extension, or `.exe`) → run directly
//!
//! Explicit entries from the config file override discovered ones.

use std::collections::HashMap;
use std::path::Path;

use super::types::CapabilityConfig;

// ─── Server Kinds ───────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ServerKind {
    Python,
    Executable,
}

/// Split a file name into `(capability_name, kind)` if it names a server.
fn classify(file_name: &str) -> Option<(String, ServerKind)> {
    if file_name.starts_with('_') || file_name.starts_with('.') {
        return None;
    }

    if let Some(stem) = file_name.strip_suffix(".py") {
        return capability_name(stem).map(|n| (n, ServerKind::Python));
    }

    let stem = file_name.strip_suffix(".exe").unwrap_or(file_name);
    if stem.contains('.') {
        return None;
    }
    capability_name(stem).map(|n| (n, ServerKind::Executable))
}

fn capability_name(stem: &str) -> Option<String> {
    let name = stem
        .strip_suffix("_server")
        .or_else(|| stem.strip_suffix("-server"))?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Platform-correct Python command.
pub fn default_python_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

// ─── Discovery ──────────────────────────────────────────────────────────────

/// Scan `servers_dir` and generate a config per capability server found.
///
/// Returns an empty map if the directory doesn't exist.
pub fn discover_servers(servers_dir: &Path, python: &str) -> HashMap<String, CapabilityConfig> {
    let mut configs = HashMap::new();

    let entries = match std::fs::read_dir(servers_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                path = %servers_dir.display(),
                error = %e,
                "servers directory not found, skipping auto-discovery"
            );
            return configs;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let Some((name, kind)) = classify(file_name) else {
            continue;
        };

        let script = path.to_string_lossy().into_owned();
        let config = match kind {
            ServerKind::Python => CapabilityConfig {
                command: python.to_string(),
                args: vec![script],
                env: HashMap::new(),
                cwd: None,
            },
            ServerKind::Executable => CapabilityConfig {
                command: script,
                args: Vec::new(),
                env: HashMap::new(),
                cwd: None,
            },
        };

        tracing::debug!(capability = %name, kind = ?kind, "auto-discovered capability server");
        configs.insert(name, config);
    }

    configs
}

// ─── Merge ──────────────────────────────────────────────────────────────────

/// Merge auto-discovered configs with explicit ones. Explicit entries fully
/// replace discovered entries of the same name.
pub fn merge_configs(
    mut discovered: HashMap<String, CapabilityConfig>,
    overrides: HashMap<String, CapabilityConfig>,
) -> HashMap<String, CapabilityConfig> {
    discovered.extend(overrides);
    discovered
}

// ─── Tests ──────────────────────────────────────────────────────────────────
