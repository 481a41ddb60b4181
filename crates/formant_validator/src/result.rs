//! Validation result types

use formant_path::FormPath;
use serde::{Deserialize, Serialize};

/// Messages produced by one field during a validation pass
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateMessage {
    /// Graph path of the originating field
    pub path: FormPath,
    /// Display name of the originating field
    pub name: String,
    pub messages: Vec<String>,
}

/// Aggregated form-level validation outcome
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateResult {
    pub errors: Vec<ValidateMessage>,
    pub warnings: Vec<ValidateMessage>,
}

impl ValidateResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another result into this one, preserving order
    pub fn merge(&mut self, other: ValidateResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Raw per-field outcome of running a rule list
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldValidateResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FieldValidateResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}
