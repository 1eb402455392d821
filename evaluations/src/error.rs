//! Error types for tool-call evaluation.

use thiserror::Error;

/// Errors that abort a whole scoring or preprocessing call.
///
/// A tool call whose payload fails to parse is never one of these: it is
/// scored as a miss for that turn only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The caller passed inputs that cannot be paired up turn by turn.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A dataset row could not be turned into evaluation pairs.
    #[error("Invalid dataset record {index}: {message}")]
    Dataset { index: usize, message: String },
}

impl EvaluationError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EvaluationError>;
