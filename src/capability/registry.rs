//! Capability registry: the named set of running capability links.
//!
//! The set of links is fixed between `start_all` and `stop_all`. The pipeline
//! controller borrows the registry immutably for the duration of a question.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use tokio::task::JoinHandle;

use super::errors::CapabilityError;
use super::link::CapabilityLink;
use super::types::CapabilityConfig;

/// Named collection of started capability links.
#[derive(Default)]
pub struct CapabilityRegistry {
    links: HashMap<String, CapabilityLink>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from links that have already been started.
    pub fn from_links(links: impl IntoIterator<Item = CapabilityLink>) -> Self {
        Self {
            links: links
                .into_iter()
                .map(|link| (link.name().to_string(), link))
                .collect(),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn and start every configured capability concurrently.
    ///
    /// A capability that fails to start is logged, returned in the error
    /// list, and left out of the registry; the others still start.
    pub async fn start_all(
        configs: &HashMap<String, CapabilityConfig>,
        working_dir: Option<&str>,
    ) -> (Self, Vec<(String, CapabilityError)>) {
        let mut handles = Vec::with_capacity(configs.len());
        for (name, config) in configs {
            let name = name.clone();
            let config = config.clone();
            let wd = working_dir.map(|s| s.to_string());
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                tracing::info!(capability = %task_name, command = %config.command, "starting capability");
                let mut link = CapabilityLink::spawn(&task_name, &config, wd.as_deref())?;
                link.start().await;
                Ok::<_, CapabilityError>(link)
            });
            handles.push((name, handle));
        }

        let (links, errors) = join_started(handles).await;
        (Self { links }, errors)
    }

    /// Stop every link, best-effort, then clear the registry.
    pub async fn stop_all(&mut self) {
        for (name, link) in self.links.iter_mut() {
            link.stop().await;
            tracing::info!(capability = %name, "stopped capability");
        }
        self.links.clear();
    }

    // ─── Lookup ──────────────────────────────────────────────────────────

    /// Link for a capability, if it started.
    pub fn get(&self, name: &str) -> Option<&CapabilityLink> {
        self.links.get(name)
    }

    /// Whether a capability is present.
    pub fn contains(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    /// Names of all present capabilities, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.links.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Capability name → sorted discovered tool names.
    pub fn tool_summary(&self) -> BTreeMap<String, Vec<String>> {
        self.links
            .iter()
            .map(|(name, link)| (name.clone(), link.tools()))
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

type StartHandle = JoinHandle<Result<CapabilityLink, CapabilityError>>;

/// Await every start task, keeping each outcome under its capability name.
async fn join_started(
    handles: Vec<(String, StartHandle)>,
) -> (HashMap<String, CapabilityLink>, Vec<(String, CapabilityError)>) {
    let mut links = HashMap::new();
    let mut errors = Vec::new();

    let (names, handles): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
    for (name, joined) in names.into_iter().zip(join_all(handles).await) {
        match joined {
            Ok(Ok(link)) => {
                tracing::info!(capability = %name, tools = ?link.tools(), "started capability");
                links.insert(name, link);
            }
            Ok(Err(e)) => {
                tracing::error!(capability = %name, error = %e, "failed to start capability");
                errors.push((name, e));
            }
            Err(e) => {
                tracing::error!(capability = %name, error = %e, "capability start task failed");
                let reason = format!("start task failed: {e}");
                errors.push((name.clone(), CapabilityError::SpawnFailed { name, reason }));
            }
        }
    }

    (links, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::contract::{EXECUTE_SQL_QUERY, GET_AGENT_INSIGHTS};
    use crate::capability::testing::{fake_link, FakeCapability};

    #[test]
    fn test_new_registry_empty() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("sql").is_none());
    }

    #[tokio::test]
    async fn test_from_links_keys_by_name() {
        let (sql, _) = fake_link("sql", FakeCapability::new().with_tools(&[EXECUTE_SQL_QUERY])).await;
        let (agent, _) =
            fake_link("agent", FakeCapability::new().with_tools(&[GET_AGENT_INSIGHTS])).await;

        let registry = CapabilityRegistry::from_links(vec![sql, agent]);
        assert_eq!(registry.names(), vec!["agent", "sql"]);
        assert!(registry.contains("sql"));

        let summary = registry.tool_summary();
        assert_eq!(summary["sql"], vec![EXECUTE_SQL_QUERY.to_string()]);
    }

    #[tokio::test]
    async fn test_stop_all_clears() {
        let (sql, _) = fake_link("sql", FakeCapability::new().with_tools(&[EXECUTE_SQL_QUERY])).await;
        let mut registry = CapabilityRegistry::from_links(vec![sql]);

        registry.stop_all().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_start_all_skips_failed_capability() {
        let mut configs = HashMap::new();
        configs.insert(
            "broken".to_string(),
            CapabilityConfig::new("/nonexistent/omcp-broken-server", &[]),
        );
        #[cfg(unix)]
        configs.insert(
            "sql".to_string(),
            CapabilityConfig::new(
                "sh",
                &["-c", r#"while read line; do echo '{"tools":[{"name":"Execute_SQL_Query"}]}'; done"#],
            ),
        );

        let (mut registry, errors) = CapabilityRegistry::start_all(&configs, None).await;

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "broken");
        assert!(matches!(errors[0].1, CapabilityError::SpawnFailed { .. }));
        assert!(!registry.contains("broken"));

        #[cfg(unix)]
        {
            let sql = registry.get("sql").expect("sql should have started");
            assert!(sql.has_tool(EXECUTE_SQL_QUERY));
        }

        registry.stop_all().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_panicked_start_task_reported_under_its_name() {
        let (sql, _) = fake_link("sql", FakeCapability::new().with_tools(&[EXECUTE_SQL_QUERY])).await;
        let ok: StartHandle = tokio::spawn(async move { Ok(sql) });
        let panicked: StartHandle = tokio::spawn(async { panic!("start task blew up") });

        let (mut links, errors) =
            join_started(vec![("sql".to_string(), ok), ("agent".to_string(), panicked)]).await;

        assert!(links.contains_key("sql"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "agent");
        match &errors[0].1 {
            CapabilityError::SpawnFailed { name, reason } => {
                assert_eq!(name, "agent");
                assert!(reason.starts_with("start task failed"), "{reason}");
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }

        for link in links.values_mut() {
            link.stop().await;
        }
    }
}
