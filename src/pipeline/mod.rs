//! Question pipeline: natural-language question to validated SQL, results,
//! answer and optional expert insights.

pub mod controller;
pub mod errors;
pub mod types;

pub use controller::PipelineController;
pub use errors::PipelineError;
pub use types::{
    Insights, PipelineAnswer, PipelineFailure, PipelineRoutes, PipelineState, PipelineStep,
    RefinementInfo, ValidationOutcome, ValidationReport,
};
