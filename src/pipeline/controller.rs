//! Pipeline controller: drives one question through the capability chain.
//!
//! The sequence is fixed: context → generate → validate → (refine) →
//! execute → answer → insights. Every step except insights is required; the
//! first required step that fails ends the run with a [`PipelineFailure`]
//! carrying whatever state was gathered so far.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::Instrument;

use crate::capability::contract::{
    COMPREHENSIVE_VALIDATION, EXECUTE_SQL_QUERY, GENERATE_ANSWER, GENERATE_SQL,
    GET_AGENT_INSIGHTS, GET_OMOP_SCHEMA, REFINE_SQL,
};
use crate::capability::{CapabilityLink, CapabilityRegistry};

use super::errors::PipelineError;
use super::types::{
    GeneratedSql, Insights, PipelineAnswer, PipelineFailure, PipelineRoutes, PipelineState,
    PipelineStep, RefinementInfo, ValidationOutcome, ValidationReport,
};

/// Runs questions against a started registry.
pub struct PipelineController<'a> {
    registry: &'a CapabilityRegistry,
    routes: &'a PipelineRoutes,
}

impl<'a> PipelineController<'a> {
    pub fn new(registry: &'a CapabilityRegistry, routes: &'a PipelineRoutes) -> Self {
        Self { registry, routes }
    }

    // ─── Questions ───────────────────────────────────────────────────────

    /// Answer a natural-language question.
    ///
    /// `context` replaces the schema lookup when it is non-blank.
    pub async fn process(
        &self,
        question: &str,
        context: Option<&str>,
    ) -> Result<PipelineAnswer, PipelineFailure> {
        let started = Instant::now();
        let mut state = PipelineState::new(question, context);
        let span = tracing::info_span!("pipeline", request_id = %state.request_id);

        let outcome = self.run(&mut state, started).instrument(span).await;
        match outcome {
            Ok(answer) => {
                tracing::info!(
                    request_id = %answer.request_id,
                    elapsed_ms = answer.elapsed_ms,
                    was_refined = answer.refinement_info.was_refined(),
                    insights = answer.agent_insights.is_received(),
                    "pipeline completed"
                );
                Ok(answer)
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %state.request_id,
                    step = %error.step(),
                    error = %error,
                    "pipeline failed"
                );
                Err(PipelineFailure { error, state })
            }
        }
    }

    async fn run(
        &self,
        state: &mut PipelineState,
        started: Instant,
    ) -> Result<PipelineAnswer, PipelineError> {
        tracing::info!(question = %state.question, "processing question");

        // 1. Context
        let schema = match state.context.clone() {
            Some(context) => context,
            None => {
                let value = self
                    .call_required(
                        PipelineStep::Context,
                        &self.routes.schema,
                        GET_OMOP_SCHEMA,
                        json!({}),
                    )
                    .await?;
                let schema = value_to_text(value);
                state.context = Some(schema.clone());
                schema
            }
        };

        // 2. Generate
        let value = self
            .call_required(
                PipelineStep::Generate,
                &self.routes.generation,
                GENERATE_SQL,
                json!({"prompt": state.question, "schema": schema}),
            )
            .await?;
        let generated =
            GeneratedSql::from_value(&value).ok_or_else(|| PipelineError::StepFailed {
                step: PipelineStep::Generate,
                reason: format!("unrecognised SQL generation result: {value}"),
            })?;
        tracing::info!(sql = %generated.sql, confidence = generated.confidence, "generated SQL");
        state.sql = Some(generated.sql.clone());
        state.confidence = Some(generated.confidence);

        // 3. Validate
        let mut validation = self.validate(&generated.sql).await?;
        state.validation = Some(validation.clone());
        let mut refinement = RefinementInfo::new(&generated.sql);
        let mut sql = generated.sql;

        // 4. Refine
        if !validation.is_valid {
            tracing::info!(issues = ?validation.issues, "validation failed, attempting refinement");
            refinement.refinement_attempted = true;

            if let Some((refined_sql, refined)) = self
                .refine(&sql, &validation.issues)
                .await
                .and_then(accept_refinement)
            {
                tracing::info!(sql = %refined_sql, "refinement successful");
                refinement.refinement_successful = true;
                sql = refined_sql;
                validation = refined;
                state.sql = Some(sql.clone());
                state.validation = Some(validation.clone());
            }
        }
        state.refinement_info = Some(refinement.clone());
        if refinement.refinement_attempted && !refinement.refinement_successful {
            return Err(PipelineError::ValidationFailed {
                issues: validation.issues,
            });
        }

        // 5. Execute
        let results = self
            .call_required(
                PipelineStep::Execute,
                &self.routes.execution,
                EXECUTE_SQL_QUERY,
                json!({"query": sql}),
            )
            .await?;
        state.results = Some(results.clone());

        // 6. Answer
        let answer = self
            .call_required(
                PipelineStep::Answer,
                &self.routes.generation,
                GENERATE_ANSWER,
                json!({"question": state.question, "sql_query": sql, "results": results}),
            )
            .await
            .map(value_to_text)?;
        state.answer = Some(answer.clone());

        // 7. Insights
        let insights = self.insights(&state.question, &sql).await;
        state.agent_insights = insights.clone();

        Ok(PipelineAnswer {
            request_id: state.request_id.clone(),
            answer,
            sql,
            confidence: generated.confidence,
            validation,
            results,
            agent_insights: insights,
            refinement_info: refinement,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    // ─── Validation ──────────────────────────────────────────────────────

    /// Validate a SQL statement, attempting refinement when it fails.
    ///
    /// Unlike [`process`](Self::process), an invalid statement is a normal
    /// report rather than an error.
    pub async fn validate_sql(&self, sql: &str) -> Result<ValidationReport, PipelineError> {
        let validation = self.validate(sql).await?;

        let mut report = ValidationReport {
            is_valid: validation.is_valid,
            issues: validation.issues.clone(),
            refinement_attempted: false,
            refinement_successful: false,
            refined_sql: None,
            refined_issues: None,
        };

        if !validation.is_valid {
            report.refinement_attempted = true;
            if let Some((refined_sql, refined)) = self
                .refine(sql, &validation.issues)
                .await
                .and_then(accept_refinement)
            {
                report.refinement_successful = true;
                report.refined_sql = Some(refined_sql);
                report.refined_issues = Some(refined.issues);
            }
        }

        tracing::info!(
            is_valid = report.is_valid,
            refinement_successful = report.refinement_successful,
            "validated SQL"
        );
        Ok(report)
    }

    async fn validate(&self, sql: &str) -> Result<ValidationOutcome, PipelineError> {
        let value = self
            .call_required(
                PipelineStep::Validate,
                &self.routes.validation,
                COMPREHENSIVE_VALIDATION,
                json!({"sql_query": sql}),
            )
            .await?;
        ValidationOutcome::from_value(value).map_err(|e| PipelineError::StepFailed {
            step: PipelineStep::Validate,
            reason: format!("unrecognised validation result: {e}"),
        })
    }

    /// One refinement attempt. `None` when the validation capability has no
    /// refinement tool or the call produced nothing usable.
    async fn refine(&self, sql: &str, issues: &[String]) -> Option<ValidationOutcome> {
        let link = self.registry.get(&self.routes.validation)?;
        if !link.has_tool(REFINE_SQL) {
            tracing::info!(capability = %link.name(), "no refinement tool available");
            return None;
        }

        let value = match link
            .call(REFINE_SQL, json!({"sql_query": sql, "issues": issues}))
            .await
        {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(step = %PipelineStep::Refine, error = %e, "refinement call failed");
                return None;
            }
        };

        match ValidationOutcome::from_value(value) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(step = %PipelineStep::Refine, error = %e, "unrecognised refinement result");
                None
            }
        }
    }

    // ─── Insights ────────────────────────────────────────────────────────

    /// Optional domain-expert commentary. Never fails the run.
    async fn insights(&self, question: &str, sql: &str) -> Insights {
        let Some(link) = self.registry.get(&self.routes.agent) else {
            let reason = format!("capability '{}' is not running", self.routes.agent);
            tracing::warn!(step = %PipelineStep::Insights, %reason, "insights unavailable");
            return Insights::Unavailable { reason };
        };

        let params = json!({
            "prompt": question,
            "sql": sql,
            "agent_type": self.routes.insight_agent_type,
        });

        match link.call(GET_AGENT_INSIGHTS, params).await {
            Ok(value) => {
                if let Some(error) = value.get("error") {
                    let reason = value_to_text(error.clone());
                    tracing::warn!(step = %PipelineStep::Insights, %reason, "agent reported an error");
                    Insights::Unavailable { reason }
                } else if is_blank(&value) {
                    Insights::Unavailable {
                        reason: "agent returned no insights".into(),
                    }
                } else {
                    Insights::Received(value)
                }
            }
            Err(e) => {
                tracing::warn!(step = %PipelineStep::Insights, error = %e, "insights unavailable");
                Insights::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn link(&self, step: PipelineStep, capability: &str) -> Result<&CapabilityLink, PipelineError> {
        self.registry
            .get(capability)
            .ok_or_else(|| PipelineError::MissingCapability {
                step,
                capability: capability.to_string(),
            })
    }

    /// Call a tool whose result the run cannot continue without.
    async fn call_required(
        &self,
        step: PipelineStep,
        capability: &str,
        tool: &str,
        parameters: Value,
    ) -> Result<Value, PipelineError> {
        let link = self.link(step, capability)?;
        tracing::debug!(%step, capability, tool, "running step");

        match link.call(tool, parameters).await {
            Ok(value) if !is_blank(&value) => Ok(value),
            Ok(_) => Err(PipelineError::StepFailed {
                step,
                reason: format!("{tool} returned an empty result"),
            }),
            Err(e) => Err(PipelineError::StepFailed {
                step,
                reason: e.to_string(),
            }),
        }
    }
}

/// A refinement counts only when it is valid and carries replacement SQL.
fn accept_refinement(outcome: ValidationOutcome) -> Option<(String, ValidationOutcome)> {
    if !outcome.is_valid {
        tracing::info!(issues = ?outcome.issues, "refinement still invalid");
        return None;
    }
    let sql = outcome
        .refined_sql
        .as_deref()
        .map(str::trim)
        .filter(|sql| !sql.is_empty())
        .map(str::to_string);
    match sql {
        Some(sql) => Some((sql, outcome)),
        None => {
            tracing::warn!("refinement reported valid without refined_sql");
            None
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
