//! Orchestrator configuration loading.
//!
//! Reads `omcp.yaml` from the project root and resolves environment
//! variables. The file is optional: without it, capability servers are
//! auto-discovered from `mcp_servers/` and the default routes apply.

pub mod errors;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::capability::discovery::{default_python_command, discover_servers, merge_configs};
use crate::capability::CapabilityConfig;
use crate::pipeline::PipelineRoutes;

pub use errors::ConfigError;

/// Config file name searched for at the project root.
pub const CONFIG_FILE_NAME: &str = "omcp.yaml";

/// Env var that pins the project root.
pub const PROJECT_ROOT_ENV: &str = "OMCP_PROJECT_ROOT";

const DEFAULT_SERVERS_DIR: &str = "mcp_servers";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `omcp.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory scanned for capability servers. Relative paths resolve
    /// against the project root. Default: `mcp_servers`.
    #[serde(default)]
    pub servers_dir: Option<String>,
    /// Interpreter for auto-discovered Python servers.
    #[serde(default)]
    pub python: Option<String>,
    /// Explicit capability entries. These replace auto-discovered entries
    /// of the same name.
    #[serde(default)]
    pub capabilities: HashMap<String, CapabilityConfig>,
    /// Optional allowlist of capability names to start.
    ///
    /// Default: `None` (every configured or discovered capability starts).
    #[serde(default)]
    pub enabled_capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub routes: PipelineRoutes,
}

impl OrchestratorConfig {
    /// Absolute servers directory for a project root.
    pub fn servers_dir(&self, project_root: &Path) -> PathBuf {
        let dir = self.servers_dir.as_deref().unwrap_or(DEFAULT_SERVERS_DIR);
        resolve_against(project_root, dir)
    }

    /// Final set of capabilities to start.
    ///
    /// Auto-discovered servers are merged with explicit entries, filtered by
    /// the allowlist, and relative `cwd` values are made absolute.
    pub fn capability_configs(&self, project_root: &Path) -> HashMap<String, CapabilityConfig> {
        let python = self.python.as_deref().unwrap_or(default_python_command());
        let discovered = discover_servers(&self.servers_dir(project_root), python);
        let mut configs = merge_configs(discovered, self.capabilities.clone());

        if let Some(enabled) = &self.enabled_capabilities {
            configs.retain(|name, _| enabled.iter().any(|e| e == name));
        }

        for config in configs.values_mut() {
            if let Some(cwd) = &config.cwd {
                config.cwd = Some(resolve_against(project_root, cwd).to_string_lossy().into_owned());
            }
        }

        configs
    }
}

/// A loaded configuration and where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub project_root: PathBuf,
    /// `None` when no config file was found and defaults are in use.
    pub config_path: Option<PathBuf>,
    pub config: OrchestratorConfig,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `omcp.yaml`.
///
/// Checks `OMCP_PROJECT_ROOT` first, then searches upward from `start`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    let env_root = std::env::var(PROJECT_ROOT_ENV).ok().map(PathBuf::from);
    find_config_path_from(env_root.as_deref(), start)
}

fn find_config_path_from(env_root: Option<&Path>, start: &Path) -> Result<PathBuf, ConfigError> {
    // 1. Pinned root
    if let Some(root) = env_root {
        let candidate = root.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        file: CONFIG_FILE_NAME.to_string(),
        start: start.to_path_buf(),
    })
}

/// Load and parse a configuration file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    // An empty file is a valid, all-defaults config.
    if interpolated.trim().is_empty() {
        return Ok(OrchestratorConfig::default());
    }

    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Find and load the configuration, falling back to defaults.
///
/// A config file that exists but cannot be parsed is an error; a missing
/// file is not.
pub fn resolve_config(start: &Path) -> Result<ResolvedConfig, ConfigError> {
    let env_root = std::env::var(PROJECT_ROOT_ENV).ok().map(PathBuf::from);
    resolve_config_from(env_root.as_deref(), start)
}

fn resolve_config_from(env_root: Option<&Path>, start: &Path) -> Result<ResolvedConfig, ConfigError> {
    match find_config_path_from(env_root, start) {
        Ok(path) => {
            let config = load_config(&path)?;
            let project_root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| start.to_path_buf());
            tracing::info!(path = %path.display(), "loaded configuration");
            Ok(ResolvedConfig {
                project_root,
                config_path: Some(path),
                config,
            })
        }
        Err(ConfigError::NotFound { .. }) => {
            let project_root = env_root.unwrap_or(start).to_path_buf();
            tracing::info!(
                root = %project_root.display(),
                "no {CONFIG_FILE_NAME} found, using defaults"
            );
            Ok(ResolvedConfig {
                project_root,
                config_path: None,
                config: OrchestratorConfig::default(),
            })
        }
        Err(e) => Err(e),
    }
}

fn resolve_against(root: &Path, path: &str) -> PathBuf {
    let expanded = PathBuf::from(expand_tilde(path));
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
