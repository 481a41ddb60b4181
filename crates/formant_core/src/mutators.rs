//! Field mutators
//!
//! User-driven mutation surface for one data field: input changes,
//! focus/blur interaction flags, and array operations. Structural array
//! operations re-key the auxiliary state (initial values, visibility
//! caches) of item fields so state follows the item it belongs to rather
//! than the index it happened to sit at.

use crate::error::FormError;
use crate::field::Field;
use crate::form::{Form, ValidateOptions};
use crate::graph::FormNode;
use crate::lifecycle::{LifeCyclePayload, LifeCycleType};
use formant_path::{FormPath, PathSegment};
use formant_validator::ValidateResult;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

/// State that travels with an array item when it changes index
#[derive(Clone, Default)]
struct ItemAuxState {
    initial_value: Value,
    visible_cache_value: Option<Value>,
    visible_cache_values: Vec<Value>,
    values: Vec<Value>,
}

/// Mutation handle bound to one data field
pub struct Mutators {
    form: Form,
    field: Arc<Field>,
}

impl Form {
    /// Bind a mutation handle to the field matching `pattern`.
    ///
    /// Fails when nothing matches or the match is a virtual node.
    pub fn create_mutators(&self, pattern: impl Into<FormPath>) -> Result<Mutators, FormError> {
        let pattern = pattern.into();
        let node = self
            .inner()
            .graph
            .lock()
            .unwrap()
            .select_one(&pattern)
            .ok_or_else(|| FormError::InvalidMutatorTarget(pattern.to_string()))?;
        let field = node
            .as_field()
            .cloned()
            .ok_or_else(|| FormError::NotADataField(pattern.to_string()))?;
        Ok(Mutators {
            form: self.clone(),
            field,
        })
    }
}

impl Mutators {
    /// Record an input change: `value` becomes `values[0]`, the full
    /// argument list is kept, and input events fire.
    pub fn change(&self, values: Vec<Value>) -> Value {
        self.set_input(values);
        self.field.get_state(|s| s.value.clone())
    }

    pub fn focus(&self) {
        self.field.set_state(|s| s.active = true);
    }

    pub fn blur(&self) {
        self.field.set_state(|s| {
            s.active = false;
            s.visited = true;
        });
    }

    /// Append to the array value
    pub fn push(&self, value: Value) -> Vec<Value> {
        let mut items = self.current_array();
        items.push(value);
        self.set_array(items.clone());
        items
    }

    /// Drop the last array item
    pub fn pop(&self) -> Vec<Value> {
        let mut items = self.current_array();
        items.pop();
        self.set_array(items.clone());
        items
    }

    /// Insert at `index` (clamped to the array length) and shift the item
    /// state of every following index up by one.
    pub fn insert(&self, index: usize, value: Value) -> Vec<Value> {
        let mut items = self.current_array();
        let index = index.min(items.len());
        items.insert(index, value);
        let len = items.len();
        self.set_array(items.clone());
        for i in ((index + 1)..len).rev() {
            self.swap_state(i - 1, i);
        }
        self.refresh_item_values();
        items
    }

    /// Remove the item at `index` and shift the item state of every
    /// following index down by one.
    pub fn remove(&self, index: usize) -> Vec<Value> {
        let mut items = self.current_array();
        if index >= items.len() {
            return items;
        }
        let old_len = items.len();
        items.remove(index);
        self.set_array(items.clone());
        for i in index..old_len - 1 {
            self.swap_state(i, i + 1);
        }
        self.refresh_item_values();
        items
    }

    /// Remove one key from an object value
    pub fn remove_key(&self, key: &str) -> Value {
        let mut value = self.field.get_state(|s| s.value.clone());
        if let Value::Object(map) = &mut value {
            map.remove(key);
        }
        self.set_input(vec![value.clone()]);
        value
    }

    pub fn unshift(&self, value: Value) -> Vec<Value> {
        self.insert(0, value)
    }

    pub fn shift(&self) -> Vec<Value> {
        self.remove(0)
    }

    /// Move the item at `from` to `to`, swapping their item state
    pub fn move_to(&self, from: usize, to: usize) -> Vec<Value> {
        let mut items = self.current_array();
        if from >= items.len() || to >= items.len() || from == to {
            return items;
        }
        let item = items.remove(from);
        items.insert(to, item);
        self.set_array(items.clone());
        self.swap_state(from, to);
        self.refresh_item_values();
        items
    }

    /// Move one slot towards the front, wrapping to the back at index 0
    pub fn move_up(&self, index: usize) -> Vec<Value> {
        let len = self.current_array().len();
        if len == 0 {
            return Vec::new();
        }
        let to = if index == 0 { len - 1 } else { index - 1 };
        self.move_to(index, to)
    }

    /// Move one slot towards the back; the last item stays in place
    pub fn move_down(&self, index: usize) -> Vec<Value> {
        let items = self.current_array();
        if index + 1 >= items.len() {
            return items;
        }
        self.move_to(index, index + 1)
    }

    /// Whether a stored value exists for the field (or one of its items)
    pub fn exist(&self, index: Option<usize>) -> bool {
        let path = match index {
            Some(index) => self.field.data_path().index(index),
            None => self.field.data_path().clone(),
        };
        self.form.inner().exist_values_in(&path)
    }

    /// Validate just this field's subtree
    pub async fn validate(&self) -> Result<ValidateResult, FormError> {
        self.form
            .validate(self.field.path().clone(), ValidateOptions::default())
            .await
    }

    fn current_array(&self) -> Vec<Value> {
        match self.field.get_state(|s| s.value.clone()) {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }

    fn set_array(&self, items: Vec<Value>) {
        self.set_input(vec![Value::Array(items)]);
    }

    fn set_input(&self, values: Vec<Value>) {
        let value = values.first().cloned().unwrap_or(Value::Null);
        self.field.set_state(|s| {
            s.value = value;
            s.values = values;
        });
        let inner = self.form.inner();
        inner.heart.publish(
            LifeCycleType::OnFieldInputChange,
            LifeCyclePayload::Field {
                path: self.field.path().clone(),
                state: Box::new(self.field.state()),
            },
        );
        inner.heart.publish(
            LifeCycleType::OnFormInputChange,
            LifeCyclePayload::Form(Box::new(inner.form.state())),
        );
    }

    /// Exchange the item state of indices `from` and `to`: every field node
    /// under `array.from` takes the auxiliary state of its counterpart under
    /// `array.to` and vice versa. Missing counterparts contribute defaults.
    fn swap_state(&self, from: usize, to: usize) {
        let array_path = self.field.path().clone();
        // Position of the index segment being re-keyed
        let position = array_path.len();
        let from_fields = self.item_fields(&array_path.index(from));
        let to_fields = self.item_fields(&array_path.index(to));

        let from_aux = snapshot_aux(&from_fields);
        let to_aux = snapshot_aux(&to_fields);

        apply_aux(&from_fields, &to_aux, position, to);
        apply_aux(&to_fields, &from_aux, position, from);
    }

    fn item_fields(&self, prefix: &FormPath) -> Vec<Arc<Field>> {
        let graph = self.form.inner().graph.lock().unwrap();
        let mut fields = Vec::new();
        graph.each(|path, node| {
            if path.starts_with(prefix) {
                if let FormNode::Field(field) = node {
                    fields.push(field.clone());
                }
            }
        });
        fields
    }

    /// Re-read item field values from the store after a structural change,
    /// without flipping `modified` or writing back.
    fn refresh_item_values(&self) {
        let array_path = self.field.path().clone();
        let inner = self.form.inner();
        for field in self.item_fields(&array_path) {
            if field.path() == &array_path {
                continue;
            }
            let stored = inner
                .get_values_in(field.data_path())
                .unwrap_or(Value::Null);
            field.model().apply(|s| s.value = stored.clone());
        }
    }
}

fn snapshot_aux(fields: &[Arc<Field>]) -> FxHashMap<FormPath, ItemAuxState> {
    fields
        .iter()
        .map(|field| {
            let aux = field.get_state(|s| ItemAuxState {
                initial_value: s.initial_value.clone(),
                visible_cache_value: s.visible_cache_value.clone(),
                visible_cache_values: s.visible_cache_values.clone(),
                values: s.values.clone(),
            });
            (field.path().clone(), aux)
        })
        .collect()
}

fn apply_aux(
    fields: &[Arc<Field>],
    source: &FxHashMap<FormPath, ItemAuxState>,
    position: usize,
    counterpart_index: usize,
) {
    for field in fields {
        let counterpart = field
            .path()
            .with_segment(position, PathSegment::Index(counterpart_index));
        let aux = source.get(&counterpart).cloned().unwrap_or_default();
        field.set_state_silent(|s| {
            s.initial_value = aux.initial_value;
            s.visible_cache_value = aux.visible_cache_value;
            s.visible_cache_values = aux.visible_cache_values;
            s.values = aux.values;
        });
    }
}
