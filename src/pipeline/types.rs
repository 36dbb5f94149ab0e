//! Shared types for the question pipeline.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::PipelineError;

// ─── Steps & Routes ─────────────────────────────────────────────────────────

/// One step of the fixed pipeline sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Context,
    Generate,
    Validate,
    Refine,
    Execute,
    Answer,
    Insights,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Context => "context",
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Refine => "refine",
            Self::Execute => "execute",
            Self::Answer => "answer",
            Self::Insights => "insights",
        };
        f.write_str(name)
    }
}

/// Which capability serves each pipeline role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRoutes {
    #[serde(default = "default_schema_capability")]
    pub schema: String,
    #[serde(default = "default_generation_capability")]
    pub generation: String,
    #[serde(default = "default_validation_capability")]
    pub validation: String,
    #[serde(default = "default_execution_capability")]
    pub execution: String,
    #[serde(default = "default_agent_capability")]
    pub agent: String,
    /// `agent_type` passed to the insight tool.
    #[serde(default = "default_insight_agent_type")]
    pub insight_agent_type: String,
}

fn default_schema_capability() -> String {
    "sql".into()
}
fn default_generation_capability() -> String {
    "ollama".into()
}
fn default_validation_capability() -> String {
    "validation".into()
}
fn default_execution_capability() -> String {
    "sql".into()
}
fn default_agent_capability() -> String {
    "agent".into()
}
fn default_insight_agent_type() -> String {
    "medical_expert".into()
}

impl Default for PipelineRoutes {
    fn default() -> Self {
        Self {
            schema: default_schema_capability(),
            generation: default_generation_capability(),
            validation: default_validation_capability(),
            execution: default_execution_capability(),
            agent: default_agent_capability(),
            insight_agent_type: default_insight_agent_type(),
        }
    }
}

// ─── Tool Payloads ──────────────────────────────────────────────────────────

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Validation tool result: `{is_valid, issues}`; refinement adds `refined_sql`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_sql: Option<String>,
}

impl ValidationOutcome {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// SQL generation result.
///
/// Accepted as a two-element array `[sql, confidence]` or as an object
/// `{sql, confidence}`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub confidence: f64,
}

impl GeneratedSql {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let (sql, confidence) = match value {
            serde_json::Value::Array(items) if items.len() == 2 => {
                (items[0].as_str()?, items[1].as_f64()?)
            }
            serde_json::Value::Object(map) => (
                map.get("sql").and_then(|v| v.as_str())?,
                map.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0),
            ),
            _ => return None,
        };

        let sql = sql.trim();
        if sql.is_empty() {
            return None;
        }
        Some(Self {
            sql: sql.to_string(),
            confidence,
        })
    }
}

// ─── Refinement & Insights ──────────────────────────────────────────────────

/// Where the final SQL came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementInfo {
    /// SQL as first generated.
    pub original_sql: String,
    pub refinement_attempted: bool,
    pub refinement_successful: bool,
}

impl RefinementInfo {
    pub fn new(original_sql: &str) -> Self {
        Self {
            original_sql: original_sql.to_string(),
            refinement_attempted: false,
            refinement_successful: false,
        }
    }

    /// Whether the SQL that ran is a refined version.
    pub fn was_refined(&self) -> bool {
        self.refinement_attempted && self.refinement_successful
    }
}

impl Serialize for RefinementInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RefinementInfo", 4)?;
        s.serialize_field("original_sql", &self.original_sql)?;
        s.serialize_field("was_refined", &self.was_refined())?;
        s.serialize_field("refinement_attempted", &self.refinement_attempted)?;
        s.serialize_field("refinement_successful", &self.refinement_successful)?;
        s.end()
    }
}

/// Outcome of the optional insights step.
///
/// Serializes as the insight payload, or `null` when there is none.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Insights {
    /// The step has not run yet.
    #[default]
    NotRequested,
    Received(serde_json::Value),
    Unavailable { reason: String },
}

impl Insights {
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Received(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_received(&self) -> bool {
        matches!(self, Self::Received(_))
    }
}

impl Serialize for Insights {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value() {
            Some(value) => value.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

// ─── State & Results ────────────────────────────────────────────────────────

/// Data accumulated while one question moves through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub request_id: String,
    pub question: String,
    /// Schema text; fetched once and reused.
    #[serde(skip)]
    pub context: Option<String>,
    pub sql: Option<String>,
    pub confidence: Option<f64>,
    pub validation: Option<ValidationOutcome>,
    pub refinement_info: Option<RefinementInfo>,
    pub results: Option<serde_json::Value>,
    pub answer: Option<String>,
    pub agent_insights: Insights,
}

impl PipelineState {
    pub fn new(question: &str, context: Option<&str>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            question: question.to_string(),
            context: context
                .filter(|c| !c.trim().is_empty())
                .map(|c| c.to_string()),
            sql: None,
            confidence: None,
            validation: None,
            refinement_info: None,
            results: None,
            answer: None,
            agent_insights: Insights::NotRequested,
        }
    }
}

/// Aggregate result of a successful pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineAnswer {
    pub request_id: String,
    pub answer: String,
    pub sql: String,
    pub confidence: f64,
    pub validation: ValidationOutcome,
    pub results: serde_json::Value,
    pub agent_insights: Insights,
    pub refinement_info: RefinementInfo,
    pub elapsed_ms: u64,
}

/// A failed pipeline run: the error plus whatever state was gathered.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub state: PipelineState,
}

impl Serialize for PipelineFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("PipelineFailure", 8)?;
        s.serialize_field("error", &self.error.to_string())?;
        s.serialize_field("step", &self.error.step())?;
        s.serialize_field("request_id", &self.state.request_id)?;
        s.serialize_field("sql", &self.state.sql)?;
        s.serialize_field("confidence", &self.state.confidence)?;
        s.serialize_field("validation", &self.state.validation)?;
        s.serialize_field("refinement_info", &self.state.refinement_info)?;
        s.serialize_field("results", &self.state.results)?;
        s.end()
    }
}

/// Result of the standalone validate-and-refine operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub refinement_attempted: bool,
    pub refinement_successful: bool,
    pub refined_sql: Option<String>,
    pub refined_issues: Option<Vec<String>>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_sql_from_tuple() {
        let generated = GeneratedSql::from_value(&json!(["SELECT 1", 0.9])).unwrap();
        assert_eq!(generated.sql, "SELECT 1");
        assert!((generated.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_generated_sql_from_object() {
        let generated =
            GeneratedSql::from_value(&json!({"sql": "  SELECT 2  ", "confidence": 0.5})).unwrap();
        assert_eq!(generated.sql, "SELECT 2");
        assert!((generated.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_generated_sql_rejects_other_shapes() {
        assert!(GeneratedSql::from_value(&json!("SELECT 1")).is_none());
        assert!(GeneratedSql::from_value(&json!(["SELECT 1"])).is_none());
        assert!(GeneratedSql::from_value(&json!(["", 0.9])).is_none());
        assert!(GeneratedSql::from_value(&json!({"confidence": 0.9})).is_none());
    }

    #[test]
    fn test_validation_outcome_null_issues() {
        let outcome = ValidationOutcome::from_value(json!({"is_valid": true, "issues": null})).unwrap();
        assert!(outcome.is_valid);
        assert!(outcome.issues.is_empty());

        let missing = ValidationOutcome::from_value(json!({"issues": []}));
        assert!(missing.is_err());
    }

    #[test]
    fn test_refinement_info_serialization() {
        let mut info = RefinementInfo::new("SELECT *");
        info.refinement_attempted = true;
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["original_sql"], "SELECT *");
        assert_eq!(json["was_refined"], false);
        assert_eq!(json["refinement_attempted"], true);

        info.refinement_successful = true;
        assert!(info.was_refined());
    }

    #[test]
    fn test_insights_serialize_as_payload_or_null() {
        let received = Insights::Received(json!({"summary": "looks fine"}));
        assert_eq!(serde_json::to_value(&received).unwrap(), json!({"summary": "looks fine"}));

        let unavailable = Insights::Unavailable {
            reason: "agent offline".into(),
        };
        assert_eq!(serde_json::to_value(&unavailable).unwrap(), json!(null));
        assert!(!unavailable.is_received());
    }

    #[test]
    fn test_blank_context_treated_as_absent() {
        let state = PipelineState::new("q", Some("   "));
        assert!(state.context.is_none());
        let state = PipelineState::new("q", Some("schema"));
        assert_eq!(state.context.as_deref(), Some("schema"));
    }

    #[test]
    fn test_routes_defaults_from_partial_yaml() {
        let routes: PipelineRoutes = serde_yaml::from_str("generation: llm").unwrap();
        assert_eq!(routes.generation, "llm");
        assert_eq!(routes.schema, "sql");
        assert_eq!(routes.insight_agent_type, "medical_expert");
    }
}
