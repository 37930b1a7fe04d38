use thiserror::Error;

/// Errors raised by the peak extraction pipeline.
///
/// Only `InvalidArgument` and `Profiler` are fatal to a pipeline run; the
/// orchestrator recovers from the others by skipping the affected repetition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeakError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no candidate peaks found")]
    NoCandidateFound,

    #[error("fit did not converge within {iterations} iterations")]
    FitDivergence { iterations: usize },

    #[error("spectral profiler failed: {0}")]
    Profiler(String),
}

pub type Result<T> = std::result::Result<T, PeakError>;

/// Shorthand for an `InvalidArgument` error.
pub(crate) fn invalid<S: Into<String>>(msg: S) -> PeakError {
    PeakError::InvalidArgument(msg.into())
}
