use thiserror::Error;

/// Typed results of every store operation. Task-level execution failures are
/// data (`FailOutcome`), not errors; a lost claim race is the `None` claim
/// outcome, not an error either.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Payload is not a well-formed structured document (a JSON object).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation attempted against a task not in the required state.
    #[error("invalid state for {id}: expected {expected}, found {found}")]
    InvalidState {
        id: String,
        expected: &'static str,
        found: String,
    },

    /// The backing store is unreachable or rejected the operation; the
    /// caller decides whether to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
