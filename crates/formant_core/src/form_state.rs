//! Form-level observable state

use crate::model::StateType;
use formant_validator::ValidateMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

/// Single-instance state owned by the engine for the whole form
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormState {
    pub initialized: bool,
    pub pristine: bool,
    pub valid: bool,
    pub validating: bool,
    pub submitting: bool,
    pub errors: Vec<ValidateMessage>,
    pub warnings: Vec<ValidateMessage>,
    pub values: Value,
    pub initial_values: Value,
    pub mounted: bool,
    pub unmounted: bool,
    pub props: Value,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            initialized: false,
            pristine: true,
            valid: true,
            validating: false,
            submitting: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            values: Value::Object(Default::default()),
            initial_values: Value::Object(Default::default()),
            mounted: false,
            unmounted: false,
            props: Value::Null,
        }
    }
}

impl FormState {
    pub fn invalid(&self) -> bool {
        !self.valid
    }
}

/// Declared keys of `FormState`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormStateKey {
    Initialized,
    Pristine,
    Valid,
    Validating,
    Submitting,
    Errors,
    Warnings,
    Values,
    InitialValues,
    Mounted,
    Unmounted,
    Props,
}

impl FormStateKey {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "initialized" => Self::Initialized,
            "pristine" => Self::Pristine,
            "valid" => Self::Valid,
            "validating" => Self::Validating,
            "submitting" => Self::Submitting,
            "errors" => Self::Errors,
            "warnings" => Self::Warnings,
            "values" => Self::Values,
            "initialValues" => Self::InitialValues,
            "mounted" => Self::Mounted,
            "unmounted" => Self::Unmounted,
            "props" => Self::Props,
            _ => return None,
        })
    }
}

impl StateType for FormState {
    type Key = FormStateKey;

    const ALL_KEYS: &'static [FormStateKey] = &[
        FormStateKey::Initialized,
        FormStateKey::Pristine,
        FormStateKey::Valid,
        FormStateKey::Validating,
        FormStateKey::Submitting,
        FormStateKey::Errors,
        FormStateKey::Warnings,
        FormStateKey::Values,
        FormStateKey::InitialValues,
        FormStateKey::Mounted,
        FormStateKey::Unmounted,
        FormStateKey::Props,
    ];

    fn diff(prev: &Self, next: &Self) -> SmallVec<[FormStateKey; 8]> {
        let mut changed = SmallVec::new();
        if prev.initialized != next.initialized {
            changed.push(FormStateKey::Initialized);
        }
        if prev.pristine != next.pristine {
            changed.push(FormStateKey::Pristine);
        }
        if prev.valid != next.valid {
            changed.push(FormStateKey::Valid);
        }
        if prev.validating != next.validating {
            changed.push(FormStateKey::Validating);
        }
        if prev.submitting != next.submitting {
            changed.push(FormStateKey::Submitting);
        }
        if prev.errors != next.errors {
            changed.push(FormStateKey::Errors);
        }
        if prev.warnings != next.warnings {
            changed.push(FormStateKey::Warnings);
        }
        if prev.values != next.values {
            changed.push(FormStateKey::Values);
        }
        if prev.initial_values != next.initial_values {
            changed.push(FormStateKey::InitialValues);
        }
        if prev.mounted != next.mounted {
            changed.push(FormStateKey::Mounted);
        }
        if prev.unmounted != next.unmounted {
            changed.push(FormStateKey::Unmounted);
        }
        if prev.props != next.props {
            changed.push(FormStateKey::Props);
        }
        changed
    }
}
