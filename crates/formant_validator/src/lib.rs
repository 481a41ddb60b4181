//! Formant Validator
//!
//! Asynchronous validation rule engine for the Formant form engine:
//!
//! - **Rules**: declarative checks (required, format, pattern, min/max) plus
//!   async custom rules for things like network-based uniqueness checks
//! - **Registry**: per-path validation callbacks registered by the engine,
//!   aggregated into a form-level result on each validation pass
//!
//! Validation failures are data, not errors: a pass always resolves with a
//! `ValidateResult` collecting messages per originating path.

pub mod result;
pub mod rules;
pub mod validator;

pub use result::{FieldValidateResult, ValidateMessage, ValidateResult};
pub use rules::{validate_value, RuleKind, ValidateFormat, ValidateRule};
pub use validator::{FormValidator, ValidateNodeFn};
