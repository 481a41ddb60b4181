//! Formant Core
//!
//! Reactive form-state engine:
//!
//! - **Model**: generic observable state with per-key dirty tracking and
//!   batched notification
//! - **Field / VirtualField**: data-bearing and structural graph nodes bound
//!   to paths in the value tree
//! - **Graph**: path-keyed node registry with prefix-derived adjacency
//! - **Form**: the engine — registration, validation, submission, reset,
//!   lifecycle events, and graph serialization
//! - **Mutators**: user-driven mutation surface with array-state re-keying
//!
//! # Example
//!
//! ```rust
//! use formant_core::{FieldRegistryProps, Form, FormOptions};
//! use serde_json::json;
//!
//! let form = Form::new(FormOptions::new().initial_values(json!({"name": "ada"})));
//! form.register_field(FieldRegistryProps::new("name"));
//! assert_eq!(form.get_field_value("name"), Some(json!("ada")));
//! ```

pub mod error;
pub mod field;
pub mod form;
pub mod form_state;
pub mod graph;
pub mod lifecycle;
pub mod model;
pub mod mutators;
pub mod virtual_field;

pub use error::FormError;
pub use field::{Field, FieldState, FieldStateKey, ValueAccess};
pub use form::{
    create_form, FieldRegistryProps, Form, FormGraphSnapshot, FormOptions, FormSubmitResult,
    GraphNodeSnapshot, ResetOptions, SubmitHandler, ValidateOptions, VirtualFieldRegistryProps,
};
pub use form_state::{FormState, FormStateKey};
pub use graph::{FormGraph, FormNode};
pub use lifecycle::{
    Heart, HeartSubscriber, HeartSubscriberId, LifeCycleEvent, LifeCyclePayload, LifeCycleType,
};
pub use model::{DirtySet, Model, StateType, Subscriber, SubscriberId};
pub use mutators::Mutators;
pub use virtual_field::{VirtualField, VirtualFieldState, VirtualFieldStateKey};

// Re-export the sibling crates so downstream users need only one dependency
pub use formant_path::{FormPath, PathSegment};
pub use formant_validator::{
    RuleKind, ValidateFormat, ValidateMessage, ValidateResult, ValidateRule,
};
