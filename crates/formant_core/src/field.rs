//! Data-bearing field node
//!
//! A `Field` is an observable state model bound to one path in the form
//! value tree. Value and initial-value writes flow through `ValueAccess`
//! closures supplied by the engine so the field state and the form's value
//! store never diverge. Visibility changes cache the value ("recoverable
//! shown state"): hiding a field removes its value from the store, showing
//! it again restores the cached value instead of starting from scratch.

use crate::model::{Model, StateType, SubscriberId};
use formant_path::FormPath;
use formant_validator::ValidateRule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Observable state of a data-bearing field
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldState {
    pub name: String,
    pub path: FormPath,
    pub initialized: bool,
    pub value: Value,
    /// All arguments of the last `change` call (`value` is `values[0]`)
    pub values: Vec<Value>,
    pub initial_value: Value,
    #[serde(skip)]
    pub rules: Vec<ValidateRule>,
    pub required: bool,
    /// Editability declared on the field itself; overrides the form-level one
    pub self_editable: Option<bool>,
    /// Editability inherited from the form options
    pub form_editable: Option<bool>,
    pub visible: bool,
    pub display: bool,
    pub modified: bool,
    pub active: bool,
    pub visited: bool,
    pub validating: bool,
    /// Errors produced by the rule engine
    pub rule_errors: Vec<String>,
    /// Errors pushed in from effects (`set_field_state`)
    pub effect_errors: Vec<String>,
    pub rule_warnings: Vec<String>,
    pub effect_warnings: Vec<String>,
    pub mounted: bool,
    pub unmounted: bool,
    /// Drop the stored value when the field unmounts
    pub unmount_remove_value: bool,
    pub props: Value,
    /// Cached value for restoring after a visibility toggle
    pub visible_cache_value: Option<Value>,
    /// Cached change arguments, restored together with the value
    pub visible_cache_values: Vec<Value>,
}

impl Default for FieldState {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: FormPath::root(),
            initialized: false,
            value: Value::Null,
            values: Vec::new(),
            initial_value: Value::Null,
            rules: Vec::new(),
            required: false,
            self_editable: None,
            form_editable: None,
            visible: true,
            display: true,
            modified: false,
            active: false,
            visited: false,
            validating: false,
            rule_errors: Vec::new(),
            effect_errors: Vec::new(),
            rule_warnings: Vec::new(),
            effect_warnings: Vec::new(),
            mounted: false,
            unmounted: false,
            unmount_remove_value: false,
            props: Value::Null,
            visible_cache_value: None,
            visible_cache_values: Vec::new(),
        }
    }
}

impl FieldState {
    /// Rule and effect errors combined, in that order
    pub fn errors(&self) -> Vec<String> {
        let mut all = self.rule_errors.clone();
        all.extend(self.effect_errors.iter().cloned());
        all
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut all = self.rule_warnings.clone();
        all.extend(self.effect_warnings.iter().cloned());
        all
    }

    /// Effective editability: field-level declaration wins over form-level
    pub fn editable(&self) -> bool {
        self.self_editable.or(self.form_editable).unwrap_or(true)
    }

    pub fn valid(&self) -> bool {
        self.rule_errors.is_empty() && self.effect_errors.is_empty()
    }

    pub fn invalid(&self) -> bool {
        !self.valid()
    }

    pub fn pristine(&self) -> bool {
        self.value == self.initial_value
    }

    pub fn touched(&self) -> bool {
        self.visited || self.modified
    }
}

/// Declared keys of `FieldState` for dirty tracking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldStateKey {
    Initialized,
    Value,
    Values,
    InitialValue,
    Rules,
    Required,
    Editable,
    Visible,
    Display,
    Modified,
    Active,
    Visited,
    Validating,
    Errors,
    Warnings,
    Mounted,
    Unmounted,
    UnmountRemoveValue,
    Props,
    VisibleCacheValue,
    VisibleCacheValues,
}

impl FieldStateKey {
    /// Resolve a camelCase key name used by external callers
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "initialized" => Self::Initialized,
            "value" => Self::Value,
            "values" => Self::Values,
            "initialValue" => Self::InitialValue,
            "rules" => Self::Rules,
            "required" => Self::Required,
            "editable" => Self::Editable,
            "visible" => Self::Visible,
            "display" => Self::Display,
            "modified" => Self::Modified,
            "active" => Self::Active,
            "visited" => Self::Visited,
            "validating" => Self::Validating,
            "errors" => Self::Errors,
            "warnings" => Self::Warnings,
            "mounted" => Self::Mounted,
            "unmounted" => Self::Unmounted,
            "unmountRemoveValue" => Self::UnmountRemoveValue,
            "props" => Self::Props,
            _ => return None,
        })
    }
}

fn rules_equal(a: &[ValidateRule], b: &[ValidateRule]) -> bool {
    use formant_validator::RuleKind;
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| {
            x.message == y.message
                && x.warning_only == y.warning_only
                && match (&x.kind, &y.kind) {
                    (RuleKind::Required, RuleKind::Required) => true,
                    (RuleKind::Format(f1), RuleKind::Format(f2)) => f1 == f2,
                    (RuleKind::Pattern(r1), RuleKind::Pattern(r2)) => r1.as_str() == r2.as_str(),
                    (RuleKind::Min(n1), RuleKind::Min(n2)) => n1 == n2,
                    (RuleKind::Max(n1), RuleKind::Max(n2)) => n1 == n2,
                    (RuleKind::Custom(c1), RuleKind::Custom(c2)) => Arc::ptr_eq(c1, c2),
                    _ => false,
                }
        })
}

impl StateType for FieldState {
    type Key = FieldStateKey;

    const ALL_KEYS: &'static [FieldStateKey] = &[
        FieldStateKey::Initialized,
        FieldStateKey::Value,
        FieldStateKey::Values,
        FieldStateKey::InitialValue,
        FieldStateKey::Rules,
        FieldStateKey::Required,
        FieldStateKey::Editable,
        FieldStateKey::Visible,
        FieldStateKey::Display,
        FieldStateKey::Modified,
        FieldStateKey::Active,
        FieldStateKey::Visited,
        FieldStateKey::Validating,
        FieldStateKey::Errors,
        FieldStateKey::Warnings,
        FieldStateKey::Mounted,
        FieldStateKey::Unmounted,
        FieldStateKey::UnmountRemoveValue,
        FieldStateKey::Props,
        FieldStateKey::VisibleCacheValue,
        FieldStateKey::VisibleCacheValues,
    ];

    fn diff(prev: &Self, next: &Self) -> SmallVec<[FieldStateKey; 8]> {
        let mut changed = SmallVec::new();
        if prev.initialized != next.initialized {
            changed.push(FieldStateKey::Initialized);
        }
        if prev.value != next.value {
            changed.push(FieldStateKey::Value);
        }
        if prev.values != next.values {
            changed.push(FieldStateKey::Values);
        }
        if prev.initial_value != next.initial_value {
            changed.push(FieldStateKey::InitialValue);
        }
        if !rules_equal(&prev.rules, &next.rules) {
            changed.push(FieldStateKey::Rules);
        }
        if prev.required != next.required {
            changed.push(FieldStateKey::Required);
        }
        if prev.self_editable != next.self_editable || prev.form_editable != next.form_editable {
            changed.push(FieldStateKey::Editable);
        }
        if prev.visible != next.visible {
            changed.push(FieldStateKey::Visible);
        }
        if prev.display != next.display {
            changed.push(FieldStateKey::Display);
        }
        if prev.modified != next.modified {
            changed.push(FieldStateKey::Modified);
        }
        if prev.active != next.active {
            changed.push(FieldStateKey::Active);
        }
        if prev.visited != next.visited {
            changed.push(FieldStateKey::Visited);
        }
        if prev.validating != next.validating {
            changed.push(FieldStateKey::Validating);
        }
        if prev.rule_errors != next.rule_errors || prev.effect_errors != next.effect_errors {
            changed.push(FieldStateKey::Errors);
        }
        if prev.rule_warnings != next.rule_warnings || prev.effect_warnings != next.effect_warnings
        {
            changed.push(FieldStateKey::Warnings);
        }
        if prev.mounted != next.mounted {
            changed.push(FieldStateKey::Mounted);
        }
        if prev.unmounted != next.unmounted {
            changed.push(FieldStateKey::Unmounted);
        }
        if prev.unmount_remove_value != next.unmount_remove_value {
            changed.push(FieldStateKey::UnmountRemoveValue);
        }
        if prev.props != next.props {
            changed.push(FieldStateKey::Props);
        }
        if prev.visible_cache_value != next.visible_cache_value {
            changed.push(FieldStateKey::VisibleCacheValue);
        }
        if prev.visible_cache_values != next.visible_cache_values {
            changed.push(FieldStateKey::VisibleCacheValues);
        }
        changed
    }
}

/// Getter/setter closures binding a field to the form's value store
#[derive(Clone)]
pub struct ValueAccess {
    pub get_value: Arc<dyn Fn(&FormPath) -> Option<Value> + Send + Sync>,
    pub set_value: Arc<dyn Fn(&FormPath, Value) + Send + Sync>,
    pub remove_value: Arc<dyn Fn(&FormPath) + Send + Sync>,
    pub get_initial_value: Arc<dyn Fn(&FormPath) -> Option<Value> + Send + Sync>,
    pub set_initial_value: Arc<dyn Fn(&FormPath, Value) + Send + Sync>,
}

/// A data-bearing graph node
pub struct Field {
    model: Model<FieldState>,
    path: FormPath,
    data_path: FormPath,
    /// Suppresses rule checks and the `modified` flip while a reset
    /// rewrites state
    disabled_validate: AtomicBool,
    access: ValueAccess,
}

impl Field {
    pub fn new(
        path: FormPath,
        data_path: FormPath,
        access: ValueAccess,
        use_dirty: bool,
    ) -> Arc<Self> {
        let state = FieldState {
            name: data_path.to_string(),
            path: path.clone(),
            ..Default::default()
        };
        Arc::new(Self {
            model: Model::with_dirty_tracking(state, use_dirty),
            path,
            data_path,
            disabled_validate: AtomicBool::new(false),
            access,
        })
    }

    pub fn path(&self) -> &FormPath {
        &self.path
    }

    /// Path into the value tree (virtual ancestors stripped)
    pub fn data_path(&self) -> &FormPath {
        &self.data_path
    }

    pub fn model(&self) -> &Model<FieldState> {
        &self.model
    }

    pub fn state(&self) -> FieldState {
        self.model.state()
    }

    pub fn get_state<R>(&self, selector: impl FnOnce(&FieldState) -> R) -> R {
        self.model.get_state(selector)
    }

    pub fn set_state(&self, mutator: impl FnOnce(&mut FieldState)) {
        self.write(false, mutator);
    }

    pub fn set_state_silent(&self, mutator: impl FnOnce(&mut FieldState)) {
        self.write(true, mutator);
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.model.batch(f)
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&FieldState, &crate::model::DirtySet<FieldState>) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.model.subscribe(callback)
    }

    pub fn disabled_validate(&self) -> bool {
        self.disabled_validate.load(Ordering::SeqCst)
    }

    pub fn set_disabled_validate(&self, disabled: bool) {
        self.disabled_validate.store(disabled, Ordering::SeqCst);
    }

    fn write(&self, silent: bool, mutator: impl FnOnce(&mut FieldState)) {
        let was_initialized = self.model.get_state(|s| s.initialized);
        let changed = self.model.apply(mutator);
        self.after_apply(&changed, was_initialized);
        if !silent {
            self.model.notify();
        }
    }

    /// Post-mutation bookkeeping: store sync, modified flag, recoverable
    /// shown state. Runs before the notification so subscribers observe a
    /// consistent snapshot.
    fn after_apply(&self, changed: &[FieldStateKey], was_initialized: bool) {
        if changed.contains(&FieldStateKey::Visible) {
            let visible = self.model.get_state(|s| s.visible);
            if visible {
                let cached = self.model.get_state(|s| s.visible_cache_value.clone());
                if let Some(value) = cached {
                    self.model.apply(|s| {
                        s.visible_cache_value = None;
                        s.value = value.clone();
                        s.values = std::mem::take(&mut s.visible_cache_values);
                    });
                    (self.access.set_value)(&self.data_path, value);
                }
            } else {
                let (value, values) = self.model.get_state(|s| (s.value.clone(), s.values.clone()));
                self.model.apply(|s| {
                    s.visible_cache_value = Some(value);
                    s.visible_cache_values = values;
                });
                (self.access.remove_value)(&self.data_path);
            }
        }
        if changed.contains(&FieldStateKey::Value) {
            // A write that clears `modified` alongside the value (reset)
            // wins over the automatic flip, as does a reset in progress
            let cleared_here = changed.contains(&FieldStateKey::Modified)
                && !self.model.get_state(|s| s.modified);
            if was_initialized && !cleared_here && !self.disabled_validate() {
                self.model.apply(|s| s.modified = true);
            }
            let value = self.model.get_state(|s| s.value.clone());
            (self.access.set_value)(&self.data_path, value);
        }
        if changed.contains(&FieldStateKey::InitialValue) {
            let value = self.model.get_state(|s| s.initial_value.clone());
            (self.access.set_initial_value)(&self.data_path, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn test_access(store: Arc<Mutex<Value>>) -> ValueAccess {
        let set_store = store.clone();
        let get_store = store.clone();
        let remove_store = store.clone();
        ValueAccess {
            get_value: Arc::new(move |path| {
                formant_path::get_in(&get_store.lock().unwrap(), path).cloned()
            }),
            set_value: Arc::new(move |path, value| {
                formant_path::set_in(&mut set_store.lock().unwrap(), path, value);
            }),
            remove_value: Arc::new(move |path| {
                formant_path::remove_in(&mut remove_store.lock().unwrap(), path);
            }),
            get_initial_value: Arc::new(|_| None),
            set_initial_value: Arc::new(|_, _| {}),
        }
    }

    fn make_field(path: &str, store: Arc<Mutex<Value>>) -> Arc<Field> {
        let path = FormPath::parse(path);
        Field::new(path.clone(), path, test_access(store), true)
    }

    #[test]
    fn test_value_writes_through_to_store() {
        let store = Arc::new(Mutex::new(json!({})));
        let field = make_field("user.name", store.clone());
        field.set_state(|s| s.value = json!("ada"));
        assert_eq!(*store.lock().unwrap(), json!({"user": {"name": "ada"}}));
    }

    #[test]
    fn test_modified_flips_only_after_initialization() {
        let store = Arc::new(Mutex::new(json!({})));
        let field = make_field("a", store);
        field.set_state(|s| {
            s.value = json!(1);
            s.initialized = true;
        });
        assert!(!field.get_state(|s| s.modified));

        field.set_state(|s| s.value = json!(2));
        assert!(field.get_state(|s| s.modified));
    }

    #[test]
    fn test_explicit_modified_clear_survives_a_value_rewrite() {
        let store = Arc::new(Mutex::new(json!({})));
        let field = make_field("a", store);
        field.set_state(|s| s.initialized = true);
        field.set_state(|s| s.value = json!("typed"));
        assert!(field.get_state(|s| s.modified));

        field.set_state(|s| {
            s.value = json!("restored");
            s.modified = false;
        });
        assert!(!field.get_state(|s| s.modified));
    }

    #[test]
    fn test_hiding_caches_value_and_showing_restores_it() {
        let store = Arc::new(Mutex::new(json!({})));
        let field = make_field("a", store.clone());
        field.set_state(|s| {
            s.value = json!("kept");
            s.initialized = true;
        });

        field.set_state(|s| s.visible = false);
        assert_eq!(*store.lock().unwrap(), json!({}));
        assert_eq!(
            field.get_state(|s| s.visible_cache_value.clone()),
            Some(json!("kept"))
        );

        field.set_state(|s| s.visible = true);
        assert_eq!(*store.lock().unwrap(), json!({"a": "kept"}));
        assert_eq!(field.get_state(|s| s.visible_cache_value.clone()), None);
    }

    #[test]
    fn test_errors_combine_rule_and_effect_channels() {
        let mut state = FieldState::default();
        state.rule_errors = vec!["rule".into()];
        state.effect_errors = vec!["effect".into()];
        assert_eq!(state.errors(), vec!["rule".to_string(), "effect".to_string()]);
        assert!(state.invalid());
    }

    #[test]
    fn test_editable_resolution() {
        let mut state = FieldState::default();
        assert!(state.editable());
        state.form_editable = Some(false);
        assert!(!state.editable());
        state.self_editable = Some(true);
        assert!(state.editable());
    }
}
