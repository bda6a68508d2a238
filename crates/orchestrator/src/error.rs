use explainability::ExplainError;
use report::ReportError;
use thiserror::Error;
use vision::VisionError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Explain(#[from] ExplainError),

    #[error(transparent)]
    Report(#[from] ReportError),
}
