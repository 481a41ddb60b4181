//! Per-path validation registry
//!
//! The form engine registers one callback per data-bearing field. A
//! validation pass selects the callbacks whose path matches the requested
//! pattern, runs them in registration order, and aggregates their messages
//! into a form-level `ValidateResult`.

use crate::result::{FieldValidateResult, ValidateMessage, ValidateResult};
use formant_path::FormPath;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// Callback running one field's eligibility gate and rule list
pub type ValidateNodeFn = Arc<dyn Fn() -> BoxFuture<'static, FieldValidateResult> + Send + Sync>;

struct ValidatorNode {
    name: String,
    run: ValidateNodeFn,
}

/// Registry of per-field validation callbacks, keyed by graph path.
pub struct FormValidator {
    nodes: Mutex<IndexMap<FormPath, ValidatorNode>>,
}

impl FormValidator {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(IndexMap::new()),
        }
    }

    /// Register (or replace) the callback for `path`.
    pub fn register(&self, path: FormPath, name: impl Into<String>, run: ValidateNodeFn) {
        let name = name.into();
        tracing::debug!(path = %path, name = %name, "register validation node");
        self.nodes.lock().unwrap().insert(
            path,
            ValidatorNode {
                name,
                run,
            },
        );
    }

    /// Drop the callback for `path`.
    pub fn unregister(&self, path: &FormPath) {
        self.nodes.lock().unwrap().shift_remove(path);
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().unwrap().is_empty()
    }

    /// Run a validation pass over every node matching `pattern`.
    ///
    /// The empty pattern selects all nodes. A concrete or wildcard pattern
    /// selects exact matches plus their descendants, so validating an array
    /// field also validates its items. Nodes run sequentially in
    /// registration order; failures are aggregated, never raised.
    pub async fn validate(&self, pattern: &FormPath) -> ValidateResult {
        let targets: Vec<(FormPath, String, ValidateNodeFn)> = {
            let nodes = self.nodes.lock().unwrap();
            nodes
                .iter()
                .filter(|(path, _)| {
                    pattern.is_empty() || pattern.matches(path) || path.starts_with(pattern)
                })
                .map(|(path, node)| (path.clone(), node.name.clone(), Arc::clone(&node.run)))
                .collect()
        };

        let mut result = ValidateResult::default();
        for (path, name, run) in targets {
            let field_result = run().await;
            if !field_result.errors.is_empty() {
                result.errors.push(ValidateMessage {
                    path: path.clone(),
                    name: name.clone(),
                    messages: field_result.errors,
                });
            }
            if !field_result.warnings.is_empty() {
                result.warnings.push(ValidateMessage {
                    path,
                    name,
                    messages: field_result.warnings,
                });
            }
        }
        result
    }
}

impl Default for FormValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for building an always-ready node callback in tests and
/// simple integrations.
pub fn ready_node(result: FieldValidateResult) -> ValidateNodeFn {
    Arc::new(move || {
        let result = result.clone();
        Box::pin(async move { result }) as BoxFuture<'static, FieldValidateResult>
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(message: &str) -> ValidateNodeFn {
        ready_node(FieldValidateResult {
            errors: vec![message.to_string()],
            warnings: vec![],
        })
    }

    fn passing() -> ValidateNodeFn {
        ready_node(FieldValidateResult::default())
    }

    #[tokio::test]
    async fn test_validate_aggregates_matching_nodes() {
        let validator = FormValidator::new();
        validator.register(FormPath::parse("a"), "a", failing("a failed"));
        validator.register(FormPath::parse("b"), "b", passing());

        let result = validator.validate(&FormPath::root()).await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, FormPath::parse("a"));
        assert_eq!(result.errors[0].messages, vec!["a failed".to_string()]);
    }

    #[tokio::test]
    async fn test_validate_pattern_selects_descendants() {
        let validator = FormValidator::new();
        validator.register(FormPath::parse("list.0.name"), "name", failing("bad"));
        validator.register(FormPath::parse("other"), "other", failing("bad"));

        let result = validator.validate(&FormPath::parse("list")).await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, FormPath::parse("list.0.name"));
    }

    #[tokio::test]
    async fn test_wildcard_pattern_matches_one_level() {
        let validator = FormValidator::new();
        validator.register(FormPath::parse("a.x"), "x", failing("bad x"));
        validator.register(FormPath::parse("b.x"), "x", failing("bad x"));
        validator.register(FormPath::parse("c"), "c", failing("bad c"));

        let result = validator.validate(&FormPath::parse("*.x")).await;
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_node() {
        let validator = FormValidator::new();
        validator.register(FormPath::parse("a"), "a", failing("old"));
        validator.register(FormPath::parse("a"), "a", passing());

        let result = validator.validate(&FormPath::root()).await;
        assert!(result.is_valid());
        assert_eq!(validator.len(), 1);
    }
}
