//! Pipeline error types.

use thiserror::Error;

use super::types::PipelineStep;

/// Why a pipeline run stopped before producing an answer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capability a required step routes to is not in the registry.
    #[error("capability '{capability}' needed by the {step} step is not running")]
    MissingCapability {
        step: PipelineStep,
        capability: String,
    },

    /// A required step produced no usable result.
    #[error("{step} step failed: {reason}")]
    StepFailed {
        step: PipelineStep,
        reason: String,
    },

    /// Validation failed and refinement did not fix it.
    #[error("SQL validation failed")]
    ValidationFailed {
        issues: Vec<String>,
    },
}

impl PipelineError {
    /// The step the run stopped at.
    pub fn step(&self) -> PipelineStep {
        match self {
            Self::MissingCapability { step, .. } | Self::StepFailed { step, .. } => *step,
            Self::ValidationFailed { .. } => PipelineStep::Validate,
        }
    }
}
