use stepwise_model::{ErrorKind, ModelProviderError};
use thiserror::Error;

/// A type-erased error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error that ended a run.
///
/// Tool failures never end a run, they are reported back to the model as
/// error results instead.
#[derive(Debug, Error)]
pub enum RunError {
    /// The model call failed, after any retries.
    #[error("model call failed: {0}")]
    Model(Box<dyn ModelProviderError>),
    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    /// Returns the kind of the model error, if this is a model error.
    #[inline]
    pub fn model_error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Model(err) => Some(err.kind()),
            Self::Cancelled => None,
        }
    }
}
