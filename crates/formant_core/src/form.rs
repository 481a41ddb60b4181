//! Form context and engine
//!
//! Orchestrates registration, submission, reset, validation passes, and the
//! field-change fanout that keeps form-level state (messages, values,
//! visibility) consistent with the field graph.
//!
//! All registries are owned by the `Form` instance; there is no module-level
//! shared state. Mutation is synchronous except validation and submission,
//! which are async tasks suspending only at rule boundaries and the caller's
//! submit handler.

use crate::error::FormError;
use crate::field::{Field, FieldState, FieldStateKey, ValueAccess};
use crate::form_state::{FormState, FormStateKey};
use crate::graph::{FormGraph, FormNode};
use crate::lifecycle::{
    Heart, HeartSubscriber, HeartSubscriberId, LifeCycleEvent, LifeCyclePayload, LifeCycleType,
};
use crate::model::{DirtySet, Model};
use crate::virtual_field::{VirtualField, VirtualFieldState, VirtualFieldStateKey};
use formant_path::{exist_in, get_in, remove_in, set_in, FormPath};
use formant_validator::{
    validate_value, FieldValidateResult, FormValidator, ValidateNodeFn, ValidateResult,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Delay before the `validating` flag becomes observable, avoiding flicker
/// on fast validations
pub(crate) const VALIDATE_FLICKER_DELAY: Duration = Duration::from_millis(60);

/// Graph size above which a validation pass flags a host-render cycle
const HOST_RENDERING_THRESHOLD: usize = 100;

/// Caller-supplied submit handler: receives the validated values, resolves
/// to an arbitrary payload or a failure message.
pub type SubmitHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Deferred `set_field_state` mutator
pub type FieldStateMutator = Arc<dyn Fn(&mut FieldState) + Send + Sync>;

type SharedSubmit = Shared<BoxFuture<'static, Result<FormSubmitResult, FormError>>>;

/// Options for `Form::new`
#[derive(Default)]
pub struct FormOptions {
    pub initial_values: Value,
    pub values: Option<Value>,
    /// Form-wide editability, overridable per field
    pub editable: Option<bool>,
    /// Disable to report every key as dirty on each notification
    pub use_dirty: Option<bool>,
    /// Stop a field's rule loop at its first error
    pub validate_first: bool,
    pub lifecycles: Vec<HeartSubscriber>,
    pub on_submit: Option<SubmitHandler>,
    pub on_reset: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_validate_failed: Option<Arc<dyn Fn(&ValidateResult) + Send + Sync>>,
}

impl FormOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_values(mut self, values: Value) -> Self {
        self.initial_values = values;
        self
    }

    pub fn values(mut self, values: Value) -> Self {
        self.values = Some(values);
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = Some(editable);
        self
    }

    pub fn use_dirty(mut self, use_dirty: bool) -> Self {
        self.use_dirty = Some(use_dirty);
        self
    }

    pub fn validate_first(mut self, validate_first: bool) -> Self {
        self.validate_first = validate_first;
        self
    }

    pub fn lifecycle(mut self, callback: impl Fn(&LifeCycleEvent) + Send + Sync + 'static) -> Self {
        self.lifecycles.push(Arc::new(callback));
        self
    }

    pub fn on_submit(
        mut self,
        handler: impl Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    ) -> Self {
        self.on_submit = Some(Arc::new(handler));
        self
    }

    pub fn on_reset(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reset = Some(Arc::new(callback));
        self
    }

    pub fn on_validate_failed(
        mut self,
        callback: impl Fn(&ValidateResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_validate_failed = Some(Arc::new(callback));
        self
    }
}

/// Declarative props for `register_field`
#[derive(Default)]
pub struct FieldRegistryProps {
    pub path: Option<FormPath>,
    pub name: Option<String>,
    pub value: Option<Value>,
    pub initial_value: Option<Value>,
    pub rules: Vec<formant_validator::ValidateRule>,
    pub required: Option<bool>,
    pub editable: Option<bool>,
    pub visible: Option<bool>,
    pub display: Option<bool>,
    pub unmount_remove_value: Option<bool>,
    pub props: Option<Value>,
}

impl FieldRegistryProps {
    pub fn new(path: impl Into<FormPath>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn initial_value(mut self, value: Value) -> Self {
        self.initial_value = Some(value);
        self
    }

    pub fn rules(mut self, rules: Vec<formant_validator::ValidateRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = Some(editable);
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn display(mut self, display: bool) -> Self {
        self.display = Some(display);
        self
    }

    pub fn unmount_remove_value(mut self, remove: bool) -> Self {
        self.unmount_remove_value = Some(remove);
        self
    }

    pub fn props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }
}

/// Declarative props for `register_virtual_field`
#[derive(Default)]
pub struct VirtualFieldRegistryProps {
    pub path: Option<FormPath>,
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub display: Option<bool>,
    pub props: Option<Value>,
}

impl VirtualFieldRegistryProps {
    pub fn new(path: impl Into<FormPath>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn display(mut self, display: bool) -> Self {
        self.display = Some(display);
        self
    }

    pub fn props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }
}

/// Options for `Form::reset`
#[derive(Clone, Default)]
pub struct ResetOptions {
    /// Pattern selecting the fields to reset; default all
    pub selector: Option<FormPath>,
    /// Clear values even when an initial value exists
    pub force_clear: bool,
    /// Also drop initial values
    pub clear_initial_value: bool,
    /// Run a validation pass after the rewrite
    pub validate: bool,
}

impl ResetOptions {
    pub fn new() -> Self {
        Self {
            validate: true,
            ..Default::default()
        }
    }

    pub fn selector(mut self, selector: impl Into<FormPath>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn force_clear(mut self, force_clear: bool) -> Self {
        self.force_clear = force_clear;
        self
    }

    pub fn clear_initial_value(mut self, clear: bool) -> Self {
        self.clear_initial_value = clear;
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }
}

/// Options for `Form::validate`
#[derive(Clone, Copy)]
pub struct ValidateOptions {
    /// Reject with the aggregated result when errors exist (default)
    pub throw_errors: bool,
    /// Allow flagging a host-render cycle on large graphs
    pub host_rendering: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            throw_errors: true,
            host_rendering: false,
        }
    }
}

impl ValidateOptions {
    pub fn no_throw() -> Self {
        Self {
            throw_errors: false,
            host_rendering: false,
        }
    }
}

/// Outcome of a successful submission
#[derive(Clone, Debug)]
pub struct FormSubmitResult {
    pub values: Value,
    pub validated: ValidateResult,
    /// Whatever the submit handler resolved with
    pub payload: Option<Value>,
}

/// Serializable snapshot of one graph node, tagged by node kind
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "displayName")]
pub enum GraphNodeSnapshot {
    #[serde(rename = "FormState")]
    Form(FormState),
    #[serde(rename = "FieldState")]
    Field(FieldState),
    #[serde(rename = "VirtualFieldState")]
    Virtual(VirtualFieldState),
}

/// Flat path-string → node-state export of a whole form
pub type FormGraphSnapshot = IndexMap<String, GraphNodeSnapshot>;

/// Retained mutators per deferred pattern; the oldest broadcast is dropped
/// once a pattern accumulates this many
const PENDING_TASKS_PER_PATTERN: usize = 64;

struct PendingTask {
    pattern: FormPath,
    mutators: Vec<FieldStateMutator>,
}

#[derive(Default)]
struct ShownCache {
    visible: Option<bool>,
    display: Option<bool>,
}

pub(crate) struct Env {
    pending_tasks: Mutex<Vec<PendingTask>>,
    submitting: Mutex<Option<SharedSubmit>>,
    /// Per-child cache of explicitly-hidden state, restored when an
    /// ancestor becomes visible again
    last_shown: Mutex<FxHashMap<FormPath, ShownCache>>,
    host_rendering: AtomicBool,
}

pub(crate) struct FormInner {
    pub(crate) form: Arc<Model<FormState>>,
    pub(crate) graph: Mutex<FormGraph>,
    pub(crate) heart: Heart,
    pub(crate) validator: FormValidator,
    env: Env,
    editable: Option<bool>,
    use_dirty: bool,
    validate_first: bool,
    on_submit: Option<SubmitHandler>,
    on_reset: Option<Arc<dyn Fn() + Send + Sync>>,
    on_validate_failed: Option<Arc<dyn Fn(&ValidateResult) + Send + Sync>>,
}

/// The form engine. Cheap to clone; all clones share one instance.
#[derive(Clone)]
pub struct Form {
    inner: Arc<FormInner>,
}

/// Create a form engine from options. Equivalent to `Form::new`.
pub fn create_form(options: FormOptions) -> Form {
    Form::new(options)
}

impl Form {
    pub fn new(options: FormOptions) -> Self {
        let use_dirty = options.use_dirty.unwrap_or(true);
        // An absent value tree is an empty object, never null
        let initial_values = match options.initial_values {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let values = options.values.unwrap_or_else(|| initial_values.clone());
        let state = FormState {
            initialized: true,
            values,
            initial_values,
            ..Default::default()
        };
        let inner = Arc::new(FormInner {
            form: Arc::new(Model::with_dirty_tracking(state, use_dirty)),
            graph: Mutex::new(FormGraph::new()),
            heart: Heart::new(),
            validator: FormValidator::new(),
            env: Env {
                pending_tasks: Mutex::new(Vec::new()),
                submitting: Mutex::new(None),
                last_shown: Mutex::new(FxHashMap::default()),
                host_rendering: AtomicBool::new(false),
            },
            editable: options.editable,
            use_dirty,
            validate_first: options.validate_first,
            on_submit: options.on_submit,
            on_reset: options.on_reset,
            on_validate_failed: options.on_validate_failed,
        });

        for lifecycle in options.lifecycles {
            inner.heart.subscribe_arc(lifecycle);
        }

        let weak = Arc::downgrade(&inner);
        inner.form.subscribe(move |state, dirty| {
            if let Some(inner) = weak.upgrade() {
                inner.on_form_change(state, dirty);
            }
        });

        inner
            .heart
            .publish(LifeCycleType::OnFormInit, inner.form_payload());
        Form { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<FormInner> {
        &self.inner
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    /// Create (or reuse) the field node at the props' path.
    ///
    /// Re-registering an existing path returns the same node instance and
    /// merges the new declarative props without resetting values, so a
    /// remounting UI never loses user input.
    pub fn register_field(&self, props: FieldRegistryProps) -> Arc<Field> {
        let node_path = registry_path(&props.path, &props.name);
        let existing = {
            let graph = self.inner.graph.lock().unwrap();
            graph.get(&node_path)
        };

        if let Some(FormNode::Field(field)) = existing {
            // Reuse the node; merge declarative props only, keep data intact
            self.inner.heart.batch(|| {
                field.batch(|| {
                    field.set_state(|state| merge_declarative_props(state, &props));
                });
            });
            return field;
        }

        let field = self.create_field(node_path.clone(), &props);
        if existing.is_some() {
            // A virtual node occupied this path; swap it for the field
            self.inner
                .graph
                .lock()
                .unwrap()
                .replace(node_path, FormNode::Field(field.clone()));
        }
        field
    }

    fn create_field(&self, node_path: FormPath, props: &FieldRegistryProps) -> Arc<Field> {
        let inner = &self.inner;
        let data_path = inner.data_path(&node_path);
        let weak = Arc::downgrade(inner);
        let field = Field::new(
            node_path.clone(),
            data_path.clone(),
            value_access(weak.clone()),
            inner.use_dirty,
        );

        {
            let weak = weak.clone();
            field.subscribe(move |state, dirty| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_field_change(state, dirty);
                }
            });
        }

        inner.heart.publish(
            LifeCycleType::OnFieldWillInit,
            field_payload(&node_path, &field.state()),
        );
        if !inner.graph.lock().unwrap().exist(&node_path) {
            inner
                .graph
                .lock()
                .unwrap()
                .append_node(node_path.clone(), FormNode::Field(field.clone()));
        }

        let stored_value = inner.get_values_in(&data_path);
        let stored_initial = inner.get_initial_values_in(&data_path);
        let form_editable = inner.editable;
        inner.heart.batch(|| {
            field.batch(|| {
                field.set_state(|state| {
                    if let Some(remove) = props.unmount_remove_value {
                        state.unmount_remove_value = remove;
                    }
                    if let Some(value) = props
                        .value
                        .clone()
                        .or(stored_value)
                        .or_else(|| props.initial_value.clone())
                    {
                        state.value = value;
                    }
                    if let Some(initial) = props.initial_value.clone().or(stored_initial) {
                        state.initial_value = initial;
                    }
                    merge_declarative_props(state, props);
                    if let Some(editable) = form_editable {
                        state.form_editable = Some(editable);
                    }
                    state.initialized = true;
                });
                self.run_pending_tasks(&field);
            });
        });

        self.register_field_validator(&field);
        field
    }

    fn register_field_validator(&self, field: &Arc<Field>) {
        let inner = &self.inner;
        let weak = Arc::downgrade(inner);
        let field_arc = field.clone();
        let validate_first = inner.validate_first;
        let run: ValidateNodeFn = Arc::new(move || {
            let field = field_arc.clone();
            let weak = weak.clone();
            Box::pin(async move {
                let state = field.state();
                // Skip rule checks for non-editable, hidden, or destroyed
                // fields, and for fields with neither rules nor messages
                let skip = !state.editable()
                    || !state.visible
                    || !state.display
                    || state.unmounted
                    || field.disabled_validate()
                    || (state.rules.is_empty()
                        && state.rule_errors.is_empty()
                        && state.rule_warnings.is_empty());
                if skip {
                    return FieldValidateResult::default();
                }
                if let Some(inner) = weak.upgrade() {
                    inner.heart.publish(
                        LifeCycleType::OnFieldValidateStart,
                        field_payload(field.path(), &state),
                    );
                }
                let mut pass = Box::pin(validate_value(
                    state.value.clone(),
                    state.rules.clone(),
                    validate_first,
                ));
                // Fast validations finish before the flicker delay elapses
                // and never toggle the `validating` flag
                let result = tokio::select! {
                    result = &mut pass => result,
                    _ = tokio::time::sleep(VALIDATE_FLICKER_DELAY) => {
                        field.set_state(|s| s.validating = true);
                        pass.await
                    }
                };
                field.set_state(|s| {
                    s.validating = false;
                    s.rule_errors = result.errors.clone();
                    s.rule_warnings = result.warnings.clone();
                });
                if let Some(inner) = weak.upgrade() {
                    inner.heart.publish(
                        LifeCycleType::OnFieldValidateEnd,
                        field_payload(field.path(), &field.state()),
                    );
                }
                result
            }) as BoxFuture<'static, FieldValidateResult>
        });
        inner.validator.register(
            field.path().clone(),
            field.get_state(|s| s.name.clone()),
            run,
        );
    }

    /// Create (or reuse) the virtual node at the props' path.
    pub fn register_virtual_field(&self, props: VirtualFieldRegistryProps) -> Arc<VirtualField> {
        let inner = &self.inner;
        let node_path = registry_path(&props.path, &props.name);
        let existing = {
            let graph = inner.graph.lock().unwrap();
            graph.get(&node_path)
        };

        if let Some(FormNode::Virtual(vfield)) = existing {
            inner.heart.batch(|| {
                vfield.batch(|| {
                    vfield.set_state(|state| merge_virtual_props(state, &props));
                });
            });
            return vfield;
        }

        let vfield = VirtualField::new(node_path.clone(), inner.use_dirty);
        {
            let weak = Arc::downgrade(inner);
            vfield.subscribe(move |state, dirty| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_virtual_field_change(state, dirty);
                }
            });
        }

        inner.heart.publish(
            LifeCycleType::OnFieldWillInit,
            virtual_payload(&node_path, &vfield.state()),
        );
        {
            let mut graph = inner.graph.lock().unwrap();
            if existing.is_some() {
                graph.replace(node_path.clone(), FormNode::Virtual(vfield.clone()));
            } else {
                graph.append_node(node_path.clone(), FormNode::Virtual(vfield.clone()));
            }
        }

        inner.heart.batch(|| {
            vfield.batch(|| {
                vfield.set_state(|state| {
                    merge_virtual_props(state, &props);
                    state.initialized = true;
                });
                self.run_pending_tasks_virtual(&vfield);
            });
        });
        vfield
    }

    fn run_pending_tasks(&self, field: &Arc<Field>) {
        for mutator in self.take_pending_tasks(field.path()) {
            field.set_state(|state| mutator(state));
        }
    }

    fn run_pending_tasks_virtual(&self, vfield: &Arc<VirtualField>) {
        for mutator in self.take_pending_tasks(vfield.path()) {
            apply_mutator_to_virtual(vfield, false, &mutator);
        }
    }

    fn take_pending_tasks(&self, path: &FormPath) -> Vec<FieldStateMutator> {
        let mut tasks = self.inner.env.pending_tasks.lock().unwrap();
        let mut applicable = Vec::new();
        tasks.retain_mut(|task| {
            let hit = task.pattern.matches(path) || task.pattern == *path;
            if !hit {
                return true;
            }
            if task.pattern.is_wildcard_pattern() {
                // Wildcard tasks keep applying to future registrations
                applicable.extend(task.mutators.iter().cloned());
                true
            } else {
                applicable.append(&mut task.mutators);
                false
            }
        });
        applicable
    }

    // ─────────────────────────────────────────────────────────────────────
    // State access
    // ─────────────────────────────────────────────────────────────────────

    pub fn get_form_state<R>(&self, selector: impl FnOnce(&FormState) -> R) -> R {
        self.inner.form.get_state(selector)
    }

    pub fn form_state(&self) -> FormState {
        self.inner.form.state()
    }

    pub fn set_form_state(&self, mutator: impl FnOnce(&mut FormState)) {
        self.inner.form.set_state(mutator);
    }

    /// Read field state through a selector; resolves wildcard patterns to
    /// the first matching node.
    pub fn get_field_state<R>(
        &self,
        pattern: impl Into<FormPath>,
        selector: impl FnOnce(&FieldState) -> R,
    ) -> Option<R> {
        let pattern = pattern.into();
        let node = self.inner.graph.lock().unwrap().select_one(&pattern)?;
        node.as_field().map(|field| field.get_state(selector))
    }

    pub fn field_state(&self, pattern: impl Into<FormPath>) -> Option<FieldState> {
        self.get_field_state(pattern, |s| s.clone())
    }

    pub fn virtual_field_state(&self, pattern: impl Into<FormPath>) -> Option<VirtualFieldState> {
        let pattern = pattern.into();
        let node = self.inner.graph.lock().unwrap().select_one(&pattern)?;
        node.as_virtual().map(|vfield| vfield.state())
    }

    /// Apply `mutator` to every field matching `pattern`.
    ///
    /// When nothing matches, or the pattern is a wildcard, the mutation is
    /// queued and flushed against nodes that register later.
    pub fn set_field_state(
        &self,
        pattern: impl Into<FormPath>,
        mutator: impl Fn(&mut FieldState) + Send + Sync + 'static,
    ) {
        self.set_field_state_opt(pattern, false, mutator);
    }

    pub fn set_field_state_opt(
        &self,
        pattern: impl Into<FormPath>,
        silent: bool,
        mutator: impl Fn(&mut FieldState) + Send + Sync + 'static,
    ) {
        let pattern = pattern.into();
        let mutator: FieldStateMutator = Arc::new(mutator);
        let nodes = self.inner.graph.lock().unwrap().select(&pattern);
        let match_count = nodes.len();
        for node in nodes {
            match &node {
                FormNode::Field(field) => {
                    if silent {
                        field.set_state_silent(|state| mutator(state));
                    } else {
                        field.set_state(|state| mutator(state));
                    }
                }
                FormNode::Virtual(vfield) => {
                    apply_mutator_to_virtual(vfield, silent, &mutator);
                }
            }
        }
        if match_count == 0 || pattern.is_wildcard_pattern() {
            let mut tasks = self.inner.env.pending_tasks.lock().unwrap();
            match tasks.iter_mut().find(|task| task.pattern == pattern) {
                Some(task) => {
                    if task.mutators.len() == PENDING_TASKS_PER_PATTERN {
                        task.mutators.remove(0);
                    }
                    task.mutators.push(mutator);
                }
                None => tasks.push(PendingTask {
                    pattern,
                    mutators: vec![mutator],
                }),
            }
        }
    }

    pub fn get_field_value(&self, pattern: impl Into<FormPath>) -> Option<Value> {
        self.get_field_state(pattern, |s| s.value.clone())
    }

    pub fn set_field_value(&self, pattern: impl Into<FormPath>, value: Value) {
        self.set_field_state(pattern, move |state| state.value = value.clone());
    }

    pub fn get_field_initial_value(&self, pattern: impl Into<FormPath>) -> Option<Value> {
        self.get_field_state(pattern, |s| s.initial_value.clone())
    }

    pub fn set_field_initial_value(&self, pattern: impl Into<FormPath>, value: Value) {
        self.set_field_state(pattern, move |state| state.initial_value = value.clone());
    }

    /// Whether `key` changed for the node at `path` in the notification
    /// currently being dispatched.
    pub fn field_has_changed(
        &self,
        path: impl Into<FormPath>,
        key: &str,
    ) -> Result<bool, FormError> {
        let path = path.into();
        let node = self.inner.graph.lock().unwrap().get(&path);
        match node {
            Some(FormNode::Field(field)) => {
                let key = FieldStateKey::parse(key)
                    .ok_or_else(|| FormError::UnknownStateKey(key.to_string()))?;
                field.model().has_changed(key)
            }
            Some(FormNode::Virtual(vfield)) => {
                let key = VirtualFieldStateKey::parse(key)
                    .ok_or_else(|| FormError::UnknownStateKey(key.to_string()))?;
                vfield.model().has_changed(key)
            }
            None => Ok(false),
        }
    }

    pub fn form_has_changed(&self, key: &str) -> Result<bool, FormError> {
        let key =
            FormStateKey::parse(key).ok_or_else(|| FormError::UnknownStateKey(key.to_string()))?;
        self.inner.form.has_changed(key)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle stream
    // ─────────────────────────────────────────────────────────────────────

    pub fn subscribe(
        &self,
        callback: impl Fn(&LifeCycleEvent) + Send + Sync + 'static,
    ) -> HeartSubscriberId {
        self.inner.heart.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: HeartSubscriberId) {
        self.inner.heart.unsubscribe(id);
    }

    /// Publish an application-defined event through the lifecycle stream
    pub fn notify(&self, event: impl Into<String>, payload: Value) {
        self.inner.heart.publish(
            LifeCycleType::Custom(event.into()),
            LifeCyclePayload::Custom(payload),
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Validation / submission / reset
    // ─────────────────────────────────────────────────────────────────────

    /// Run a validation pass over the fields matching `pattern` (root
    /// pattern validates everything).
    pub async fn validate(
        &self,
        pattern: impl Into<FormPath>,
        options: ValidateOptions,
    ) -> Result<ValidateResult, FormError> {
        let pattern = pattern.into();
        let inner = self.inner.clone();

        if !inner.form.get_state(|s| s.validating) {
            // Defer the notification so fast passes never flicker
            inner.form.set_state_silent(|s| s.validating = true);
        }
        inner
            .heart
            .publish(LifeCycleType::OnFormValidateStart, inner.form_payload());

        let big_graph = inner.graph.lock().unwrap().size() > HOST_RENDERING_THRESHOLD;
        if big_graph && options.host_rendering {
            inner.env.host_rendering.store(true, Ordering::SeqCst);
        }

        let mut pass = Box::pin(inner.validator.validate(&pattern));
        let result = tokio::select! {
            result = &mut pass => result,
            _ = tokio::time::sleep(VALIDATE_FLICKER_DELAY) => {
                inner.form.notify();
                pass.await
            }
        };

        inner.form.set_state(|s| s.validating = false);
        inner
            .heart
            .publish(LifeCycleType::OnFormValidateEnd, inner.form_payload());
        if big_graph && options.host_rendering {
            inner
                .heart
                .publish(LifeCycleType::OnFormHostRender, inner.form_payload());
            inner.env.host_rendering.store(false, Ordering::SeqCst);
        }

        if !result.warnings.is_empty() {
            tracing::warn!(warnings = ?result.warnings, "validation produced warnings");
        }
        if !result.errors.is_empty() && options.throw_errors {
            return Err(FormError::ValidateFailed(result));
        }
        Ok(result)
    }

    /// Whether a large-graph validation pass is currently rendering
    pub fn is_host_rendering(&self) -> bool {
        self.inner.env.host_rendering.load(Ordering::SeqCst)
    }

    /// Validate everything, then hand the values to the submit handler.
    ///
    /// Idempotent while in flight: concurrent calls share the one running
    /// submission and resolve with the same outcome.
    pub async fn submit(
        &self,
        on_submit: Option<SubmitHandler>,
    ) -> Result<FormSubmitResult, FormError> {
        let in_flight = {
            let guard = self.inner.env.submitting.lock().unwrap();
            if self.inner.form.get_state(|s| s.submitting) {
                guard.clone()
            } else {
                None
            }
        };
        if let Some(shared) = in_flight {
            return shared.await;
        }

        self.inner
            .heart
            .publish(LifeCycleType::OnFormSubmitStart, self.inner.form_payload());
        self.inner.form.set_state(|s| s.submitting = true);

        let handler = on_submit.or_else(|| self.inner.on_submit.clone());
        let form = self.clone();
        let task: BoxFuture<'static, Result<FormSubmitResult, FormError>> =
            Box::pin(async move { form.run_submit(handler).await });
        let shared = task.shared();
        *self.inner.env.submitting.lock().unwrap() = Some(shared.clone());

        let result = shared.await;
        *self.inner.env.submitting.lock().unwrap() = None;
        result
    }

    async fn run_submit(
        &self,
        handler: Option<SubmitHandler>,
    ) -> Result<FormSubmitResult, FormError> {
        let inner = &self.inner;
        inner.heart.publish(
            LifeCycleType::OnFormSubmitValidateStart,
            inner.form_payload(),
        );
        let _ = self
            .validate(
                FormPath::root(),
                ValidateOptions {
                    throw_errors: false,
                    host_rendering: true,
                },
            )
            .await;

        let validated = inner.form.get_state(|s| ValidateResult {
            errors: s.errors.clone(),
            warnings: s.warnings.clone(),
        });
        if !validated.errors.is_empty() {
            inner.form.set_state(|s| s.submitting = false);
            inner.heart.publish(
                LifeCycleType::OnFormSubmitValidateFailed,
                inner.form_payload(),
            );
            inner
                .heart
                .publish(LifeCycleType::OnFormSubmitEnd, inner.form_payload());
            let unmounted = inner.form.get_state(|s| s.unmounted);
            if let Some(callback) = &inner.on_validate_failed {
                if !unmounted {
                    callback(&validated);
                }
            }
            return Err(FormError::ValidateFailed(validated));
        }

        inner.heart.publish(
            LifeCycleType::OnFormSubmitValidateSuccess,
            inner.form_payload(),
        );
        inner
            .heart
            .publish(LifeCycleType::OnFormSubmit, inner.form_payload());

        let values = inner.form.get_state(|s| s.values.clone());
        let unmounted = inner.form.get_state(|s| s.unmounted);
        let payload = match (&handler, unmounted) {
            (Some(handler), false) => match handler(values.clone()).await {
                Ok(payload) => {
                    inner.heart.publish(
                        LifeCycleType::OnFormOnSubmitSuccess,
                        LifeCyclePayload::Custom(payload.clone()),
                    );
                    Some(payload)
                }
                Err(message) => {
                    // Surface the handler failure instead of swallowing it
                    inner.heart.publish(
                        LifeCycleType::OnFormOnSubmitFailed,
                        LifeCyclePayload::Custom(Value::String(message.clone())),
                    );
                    inner.form.set_state(|s| s.submitting = false);
                    inner
                        .heart
                        .publish(LifeCycleType::OnFormSubmitEnd, inner.form_payload());
                    return Err(FormError::SubmitFailed(message));
                }
            },
            _ => None,
        };

        inner.form.set_state(|s| s.submitting = false);
        inner
            .heart
            .publish(LifeCycleType::OnFormSubmitEnd, inner.form_payload());
        Ok(FormSubmitResult {
            values,
            validated,
            payload,
        })
    }

    /// Reset matching fields to their initial values (or type-appropriate
    /// empties), clearing modification flags and messages.
    pub async fn reset(&self, options: ResetOptions) -> Result<Option<ValidateResult>, FormError> {
        let selector = options.selector.clone().unwrap_or_default();
        let nodes = {
            let graph = self.inner.graph.lock().unwrap();
            graph.select_with_descendants(&selector)
        };
        for node in nodes {
            if let Some(field) = node.as_field() {
                // Validation stays off while the rewrite is in progress to
                // avoid transient false positives
                field.set_disabled_validate(true);
                field.set_state(|state| reset_field_state(state, &options));
                field.set_disabled_validate(false);
            }
        }

        let unmounted = self.inner.form.get_state(|s| s.unmounted);
        if let Some(callback) = &self.inner.on_reset {
            if !unmounted {
                callback();
            }
        }
        self.inner
            .heart
            .publish(LifeCycleType::OnFormReset, self.inner.form_payload());

        if options.validate {
            let result = self.validate(selector, ValidateOptions::no_throw()).await?;
            return Ok(Some(result));
        }
        Ok(None)
    }

    /// Clear rule and effect messages for matching fields and their
    /// descendants.
    pub fn clear_errors(&self, pattern: impl Into<FormPath>) {
        let pattern = pattern.into();
        let nodes = {
            let graph = self.inner.graph.lock().unwrap();
            graph.select_with_descendants(&pattern)
        };
        for node in nodes {
            if let Some(field) = node.as_field() {
                field.set_state(|state| {
                    state.rule_errors = Vec::new();
                    state.rule_warnings = Vec::new();
                    state.effect_errors = Vec::new();
                    state.effect_warnings = Vec::new();
                });
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Graph serialization
    // ─────────────────────────────────────────────────────────────────────

    /// Export a flat path → state-snapshot mapping of the whole graph
    pub fn form_graph(&self) -> FormGraphSnapshot {
        let mut snapshot = IndexMap::new();
        snapshot.insert(
            String::new(),
            GraphNodeSnapshot::Form(self.inner.form.state()),
        );
        let graph = self.inner.graph.lock().unwrap();
        graph.each(|path, node| {
            let entry = match node {
                FormNode::Field(field) => GraphNodeSnapshot::Field(field.state()),
                FormNode::Virtual(vfield) => GraphNodeSnapshot::Virtual(vfield.state()),
            };
            snapshot.insert(path.to_string(), entry);
        });
        snapshot
    }

    /// Restore a graph exported by `form_graph`, re-registering nodes that
    /// do not exist yet. Rules are runtime closures and stay untouched.
    pub fn set_form_graph(&self, snapshot: FormGraphSnapshot) {
        for (key, entry) in snapshot {
            let path = FormPath::parse(&key);
            match entry {
                GraphNodeSnapshot::Form(state) => {
                    self.inner.form.set_state(|s| *s = state);
                }
                GraphNodeSnapshot::Field(state) => {
                    let existing = self.inner.graph.lock().unwrap().get(&path);
                    let field = match existing {
                        Some(FormNode::Field(field)) => field,
                        _ => self.register_field(FieldRegistryProps::new(path)),
                    };
                    field.set_state(|s| {
                        let rules = std::mem::take(&mut s.rules);
                        *s = state;
                        s.rules = rules;
                    });
                }
                GraphNodeSnapshot::Virtual(state) => {
                    let existing = self.inner.graph.lock().unwrap().get(&path);
                    let vfield = match existing {
                        Some(FormNode::Virtual(vfield)) => vfield,
                        _ => self.register_virtual_field(VirtualFieldRegistryProps::new(path)),
                    };
                    vfield.set_state(|s| *s = state);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Engine internals
// ─────────────────────────────────────────────────────────────────────────

impl FormInner {
    fn form_payload(&self) -> LifeCyclePayload {
        LifeCyclePayload::Form(Box::new(self.form.state()))
    }

    /// Path into the value tree: node path with virtual-node segments
    /// stripped, so structural wrappers never show up in the data.
    fn data_path(&self, node_path: &FormPath) -> FormPath {
        let graph = self.graph.lock().unwrap();
        let mut segments = Vec::new();
        let mut prefix = FormPath::root();
        for segment in node_path.segments() {
            prefix = prefix.concat(segment.clone());
            let is_virtual = matches!(graph.get(&prefix), Some(FormNode::Virtual(_)));
            if !is_virtual {
                segments.push(segment.clone());
            }
        }
        FormPath::from_segments(segments)
    }

    pub(crate) fn get_values_in(&self, path: &FormPath) -> Option<Value> {
        self.form.get_state(|s| get_in(&s.values, path).cloned())
    }

    pub(crate) fn set_values_in(&self, path: &FormPath, value: Value) {
        self.form.set_state(|s| {
            set_in(&mut s.values, path, value);
            s.pristine = s.values == s.initial_values;
        });
    }

    pub(crate) fn delete_values_in(&self, path: &FormPath) {
        self.form.set_state(|s| {
            remove_in(&mut s.values, path);
            s.pristine = s.values == s.initial_values;
        });
    }

    pub(crate) fn exist_values_in(&self, path: &FormPath) -> bool {
        self.form.get_state(|s| exist_in(&s.values, path))
    }

    fn get_initial_values_in(&self, path: &FormPath) -> Option<Value> {
        self.form
            .get_state(|s| get_in(&s.initial_values, path).cloned())
    }

    fn set_initial_values_in(&self, path: &FormPath, value: Value) {
        self.form
            .set_state(|s| set_in(&mut s.initial_values, path, value));
    }

    fn on_form_change(&self, state: &FormState, dirty: &DirtySet<FormState>) {
        let payload = LifeCyclePayload::Form(Box::new(state.clone()));
        if dirty.contains(&FormStateKey::Values) {
            self.heart
                .publish(LifeCycleType::OnFormValuesChange, payload.clone());
        }
        if dirty.contains(&FormStateKey::InitialValues) {
            self.heart
                .publish(LifeCycleType::OnFormInitialValuesChange, payload.clone());
        }
        if dirty.contains(&FormStateKey::Mounted) && state.mounted {
            self.heart
                .publish(LifeCycleType::OnFormMount, payload.clone());
        }
        if dirty.contains(&FormStateKey::Unmounted) && state.unmounted {
            self.heart
                .publish(LifeCycleType::OnFormUnmount, payload.clone());
        }
        self.heart.publish(LifeCycleType::OnFormChange, payload);
    }

    fn on_field_change(&self, state: &FieldState, dirty: &DirtySet<FieldState>) {
        let payload = field_payload(&state.path, state);
        if dirty.contains(&FieldStateKey::Initialized) && state.initialized {
            self.heart
                .publish(LifeCycleType::OnFieldInit, payload.clone());
        }
        if dirty.contains(&FieldStateKey::Value) {
            self.heart
                .publish(LifeCycleType::OnFieldValueChange, payload.clone());
        }
        if dirty.contains(&FieldStateKey::InitialValue) {
            self.heart
                .publish(LifeCycleType::OnFieldInitialValueChange, payload.clone());
        }

        let visible_dirty = dirty.contains(&FieldStateKey::Visible);
        let display_dirty = dirty.contains(&FieldStateKey::Display);
        if visible_dirty || display_dirty {
            self.propagate_shown_state(
                &state.path,
                state.visible,
                visible_dirty,
                state.display,
                display_dirty,
            );
        }

        if dirty.contains(&FieldStateKey::Unmounted) && state.unmounted {
            self.heart
                .publish(LifeCycleType::OnFieldUnmount, payload.clone());
            let data_path = self
                .graph
                .lock()
                .unwrap()
                .get(&state.path)
                .and_then(|node| node.as_field().map(|f| f.data_path().clone()));
            if let Some(data_path) = data_path {
                if state.unmount_remove_value {
                    self.delete_values_in(&data_path);
                }
                // Physical removal only when no value is retained, so
                // remount-with-data keeps its state
                if !self.exist_values_in(&data_path) {
                    self.graph.lock().unwrap().remove(&state.path);
                    self.validator.unregister(&state.path);
                }
            }
        }
        if dirty.contains(&FieldStateKey::Mounted) && state.mounted {
            self.heart
                .publish(LifeCycleType::OnFieldMount, payload.clone());
        }

        if dirty.contains(&FieldStateKey::Errors) || dirty.contains(&FieldStateKey::Warnings) {
            self.sync_form_messages(state);
        }
        if dirty.contains(&FieldStateKey::Unmounted)
            || dirty.contains(&FieldStateKey::Visible)
            || dirty.contains(&FieldStateKey::Display)
            || dirty.contains(&FieldStateKey::Editable)
        {
            self.reset_form_messages(state);
        }

        self.heart.publish(LifeCycleType::OnFieldChange, payload);
    }

    fn on_virtual_field_change(
        &self,
        state: &VirtualFieldState,
        dirty: &DirtySet<VirtualFieldState>,
    ) {
        let payload = virtual_payload(&state.path, state);
        if dirty.contains(&VirtualFieldStateKey::Initialized) && state.initialized {
            self.heart
                .publish(LifeCycleType::OnFieldInit, payload.clone());
        }
        let visible_dirty = dirty.contains(&VirtualFieldStateKey::Visible);
        let display_dirty = dirty.contains(&VirtualFieldStateKey::Display);
        if visible_dirty || display_dirty {
            self.propagate_shown_state(
                &state.path,
                state.visible,
                visible_dirty,
                state.display,
                display_dirty,
            );
        }
        if dirty.contains(&VirtualFieldStateKey::Mounted) && state.mounted {
            self.heart
                .publish(LifeCycleType::OnFieldMount, payload.clone());
        }
        self.heart.publish(LifeCycleType::OnFieldChange, payload);
    }

    /// Cascade a visibility/display change to all descendants, depth-first.
    /// Children hidden on their own keep a cache entry so showing the parent
    /// again restores their explicit state instead of forcing them visible.
    fn propagate_shown_state(
        &self,
        parent: &FormPath,
        visible: bool,
        visible_dirty: bool,
        display: bool,
        display_dirty: bool,
    ) {
        let children = {
            let graph = self.graph.lock().unwrap();
            graph.children(parent, true)
        };
        for child in children {
            let child_path = child.path().clone();
            match &child {
                FormNode::Field(field) => field.set_state_silent(|state| {
                    if visible_dirty {
                        self.update_recoverable_shown(
                            &child_path,
                            ShownKind::Visible,
                            visible,
                            &mut state.visible,
                        );
                    }
                    if display_dirty {
                        self.update_recoverable_shown(
                            &child_path,
                            ShownKind::Display,
                            display,
                            &mut state.display,
                        );
                    }
                }),
                FormNode::Virtual(vfield) => vfield.set_state_silent(|state| {
                    if visible_dirty {
                        self.update_recoverable_shown(
                            &child_path,
                            ShownKind::Visible,
                            visible,
                            &mut state.visible,
                        );
                    }
                    if display_dirty {
                        self.update_recoverable_shown(
                            &child_path,
                            ShownKind::Display,
                            display,
                            &mut state.display,
                        );
                    }
                }),
            }
        }
    }

    fn update_recoverable_shown(
        &self,
        child_path: &FormPath,
        kind: ShownKind,
        parent_shown: bool,
        current: &mut bool,
    ) {
        let mut cache = self.env.last_shown.lock().unwrap();
        let entry = cache.entry(child_path.clone()).or_default();
        if parent_shown {
            let own = match kind {
                ShownKind::Visible => entry.visible.take(),
                ShownKind::Display => entry.display.take(),
            };
            *current = own.unwrap_or(true);
        } else {
            if !*current {
                // Remember that the child was hidden by itself
                match kind {
                    ShownKind::Visible => entry.visible = Some(false),
                    ShownKind::Display => entry.display = Some(false),
                }
            }
            *current = false;
        }
    }

    /// Mirror a field's messages into form-level errors/warnings
    fn sync_form_messages(&self, state: &FieldState) {
        let errors = state.errors();
        let warnings = state.warnings();
        let path = state.path.clone();
        let name = state.name.clone();
        self.form.set_state(|form| {
            update_messages(&mut form.errors, &path, &name, errors);
            update_messages(&mut form.warnings, &path, &name, warnings);
            form.valid = form.errors.is_empty();
        });
    }

    /// Drop messages of fields that are no longer participating (hidden,
    /// unmounted, or read-only)
    fn reset_form_messages(&self, state: &FieldState) {
        if state.visible && state.display && !state.unmounted && state.editable() {
            return;
        }
        let path = state.path.clone();
        self.form.set_state(|form| {
            form.errors.retain(|message| message.path != path);
            form.warnings.retain(|message| message.path != path);
            form.valid = form.errors.is_empty();
        });
    }
}

#[derive(Clone, Copy)]
enum ShownKind {
    Visible,
    Display,
}

fn registry_path(path: &Option<FormPath>, name: &Option<String>) -> FormPath {
    path.clone()
        .or_else(|| name.as_deref().map(FormPath::parse))
        .unwrap_or_default()
}

fn merge_declarative_props(state: &mut FieldState, props: &FieldRegistryProps) {
    if let Some(visible) = props.visible {
        state.visible = visible;
    }
    if let Some(display) = props.display {
        state.display = display;
    }
    if let Some(extra) = props.props.clone() {
        state.props = extra;
    }
    if let Some(required) = props.required {
        state.required = required;
    }
    if !props.rules.is_empty() {
        state.rules = props.rules.clone();
    }
    if let Some(editable) = props.editable {
        state.self_editable = Some(editable);
    }
}

/// Run a field-state mutator against a virtual node by round-tripping the
/// structural subset (visibility, display, mount flags, props) through a
/// scratch field state. Data-only writes fall away.
fn apply_mutator_to_virtual(vfield: &Arc<VirtualField>, silent: bool, mutator: &FieldStateMutator) {
    let write = |state: &mut VirtualFieldState| {
        let mut scratch = FieldState {
            name: state.name.clone(),
            path: state.path.clone(),
            initialized: state.initialized,
            visible: state.visible,
            display: state.display,
            mounted: state.mounted,
            unmounted: state.unmounted,
            props: state.props.clone(),
            ..Default::default()
        };
        mutator(&mut scratch);
        state.visible = scratch.visible;
        state.display = scratch.display;
        state.mounted = scratch.mounted;
        state.unmounted = scratch.unmounted;
        state.props = scratch.props;
    };
    if silent {
        vfield.set_state_silent(write);
    } else {
        vfield.set_state(write);
    }
}

fn merge_virtual_props(state: &mut VirtualFieldState, props: &VirtualFieldRegistryProps) {
    if let Some(visible) = props.visible {
        state.visible = visible;
    }
    if let Some(display) = props.display {
        state.display = display;
    }
    if let Some(extra) = props.props.clone() {
        state.props = extra;
    }
}

fn reset_field_state(state: &mut FieldState, options: &ResetOptions) {
    state.modified = false;
    state.rule_errors = Vec::new();
    state.rule_warnings = Vec::new();
    state.effect_errors = Vec::new();
    state.effect_warnings = Vec::new();
    if options.clear_initial_value {
        state.initial_value = Value::Null;
    }
    // force_clear only matters when an initial value exists
    if options.force_clear || state.initial_value.is_null() {
        if state.value.is_array() {
            state.value = Value::Array(Vec::new());
        } else if !state.value.is_object() {
            state.value = Value::Null;
        }
    } else {
        let initial = state.initial_value.clone();
        state.value = match (&state.value, &initial) {
            (Value::Array(_), Value::Array(_)) => initial,
            (Value::Array(_), _) => Value::Array(Vec::new()),
            (Value::Object(_), Value::Object(_)) => initial,
            (Value::Object(_), _) => Value::Object(Default::default()),
            _ => initial,
        };
    }
}

fn update_messages(
    messages: &mut Vec<formant_validator::ValidateMessage>,
    path: &FormPath,
    name: &str,
    new_messages: Vec<String>,
) {
    messages.retain(|message| message.path != *path);
    if !new_messages.is_empty() {
        messages.push(formant_validator::ValidateMessage {
            path: path.clone(),
            name: name.to_string(),
            messages: new_messages,
        });
    }
}

fn field_payload(path: &FormPath, state: &FieldState) -> LifeCyclePayload {
    LifeCyclePayload::Field {
        path: path.clone(),
        state: Box::new(state.clone()),
    }
}

fn virtual_payload(path: &FormPath, state: &VirtualFieldState) -> LifeCyclePayload {
    LifeCyclePayload::Virtual {
        path: path.clone(),
        state: Box::new(state.clone()),
    }
}

fn value_access(weak: Weak<FormInner>) -> ValueAccess {
    let get_weak = weak.clone();
    let set_weak = weak.clone();
    let remove_weak = weak.clone();
    let get_initial_weak = weak.clone();
    let set_initial_weak = weak;
    ValueAccess {
        get_value: Arc::new(move |path| {
            get_weak
                .upgrade()
                .and_then(|inner| inner.get_values_in(path))
        }),
        set_value: Arc::new(move |path, value| {
            if let Some(inner) = set_weak.upgrade() {
                inner.set_values_in(path, value);
            }
        }),
        remove_value: Arc::new(move |path| {
            if let Some(inner) = remove_weak.upgrade() {
                inner.delete_values_in(path);
            }
        }),
        get_initial_value: Arc::new(move |path| {
            get_initial_weak
                .upgrade()
                .and_then(|inner| inner.get_initial_values_in(path))
        }),
        set_initial_value: Arc::new(move |path, value| {
            if let Some(inner) = set_initial_weak.upgrade() {
                inner.set_initial_values_in(path, value);
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_broadcasts_collapse_into_one_pending_task() {
        let form = Form::new(FormOptions::new());
        for _ in 0..10 {
            form.set_field_state("items.*.meta", |s| s.required = true);
        }
        assert_eq!(form.inner.env.pending_tasks.lock().unwrap().len(), 1);

        form.register_field(FieldRegistryProps::new("items.0.meta"));
        assert!(form.get_field_state("items.0.meta", |s| s.required).unwrap());
    }

    #[test]
    fn test_pending_mutators_are_capped_per_pattern() {
        let form = Form::new(FormOptions::new());
        for _ in 0..(PENDING_TASKS_PER_PATTERN + 10) {
            form.set_field_state("items.*.meta", |s| s.active = true);
        }
        let tasks = form.inner.env.pending_tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].mutators.len(), PENDING_TASKS_PER_PATTERN);
    }
}
