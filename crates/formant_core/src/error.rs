//! Engine error types
//!
//! Validation failures are recoverable data carried in state; only contract
//! misuse and failed terminal operations surface as `FormError`.

use formant_validator::ValidateResult;
use thiserror::Error;

/// Errors raised by the form engine's public operations.
///
/// `Clone` is required so an in-flight submission can hand the same outcome
/// to every concurrent caller.
#[derive(Clone, Debug, Error)]
pub enum FormError {
    /// `create_mutators` was called on neither a field nor a resolvable path
    #[error("`create_mutators` requires a field or a resolvable path, got `{0}`")]
    InvalidMutatorTarget(String),

    /// Dirty information was requested outside a synchronous subscriber callback
    #[error("dirty information is only available inside a synchronous subscriber callback")]
    IllegalDirtyAccess,

    /// A validation pass finished with errors and the caller asked to throw
    #[error("validation failed with {} error(s)", .0.errors.len())]
    ValidateFailed(ValidateResult),

    /// The caller's submit handler failed
    #[error("submit handler failed: {0}")]
    SubmitFailed(String),

    /// A state key name could not be resolved for dirty checking
    #[error("unknown state key `{0}`")]
    UnknownStateKey(String),

    /// A path addressed a node of the wrong kind (e.g. mutators on a virtual field)
    #[error("node at `{0}` is not a data-bearing field")]
    NotADataField(String),
}

impl FormError {
    /// The aggregated result when this is a validation failure
    pub fn validate_result(&self) -> Option<&ValidateResult> {
        match self {
            FormError::ValidateFailed(result) => Some(result),
            _ => None,
        }
    }
}
