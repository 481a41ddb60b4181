//! Lifecycle event heart
//!
//! Named engine events published to external subscribers (rendering layers,
//! effect hooks). The heart buffers publishes inside a batch scope so field
//! registration emits its events only after the node reaches a consistent
//! state.

use crate::field::FieldState;
use crate::form_state::FormState;
use crate::virtual_field::VirtualFieldState;
use formant_path::FormPath;
use serde_json::Value;
use slotmap::{new_key_type, SlotMap};
use std::sync::{Arc, Mutex};

new_key_type! {
    /// Handle for an installed lifecycle subscriber
    pub struct HeartSubscriberId;
}

/// Engine lifecycle event names
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LifeCycleType {
    OnFormInit,
    OnFormChange,
    OnFormMount,
    OnFormUnmount,
    OnFormReset,
    OnFormSubmitStart,
    OnFormSubmit,
    OnFormSubmitEnd,
    OnFormSubmitValidateStart,
    OnFormSubmitValidateSuccess,
    OnFormSubmitValidateFailed,
    OnFormOnSubmitSuccess,
    OnFormOnSubmitFailed,
    OnFormValidateStart,
    OnFormValidateEnd,
    OnFormValuesChange,
    OnFormInitialValuesChange,
    OnFormInputChange,
    OnFormHostRender,
    OnFieldWillInit,
    OnFieldInit,
    OnFieldChange,
    OnFieldInputChange,
    OnFieldValueChange,
    OnFieldInitialValueChange,
    OnFieldValidateStart,
    OnFieldValidateEnd,
    OnFieldMount,
    OnFieldUnmount,
    /// Application-defined event published through `Form::notify`
    Custom(String),
}

impl LifeCycleType {
    /// Stable external name of the event
    pub fn name(&self) -> &str {
        match self {
            LifeCycleType::OnFormInit => "onFormInit",
            LifeCycleType::OnFormChange => "onFormChange",
            LifeCycleType::OnFormMount => "onFormMount",
            LifeCycleType::OnFormUnmount => "onFormUnmount",
            LifeCycleType::OnFormReset => "onFormReset",
            LifeCycleType::OnFormSubmitStart => "onFormSubmitStart",
            LifeCycleType::OnFormSubmit => "onFormSubmit",
            LifeCycleType::OnFormSubmitEnd => "onFormSubmitEnd",
            LifeCycleType::OnFormSubmitValidateStart => "onFormSubmitValidateStart",
            LifeCycleType::OnFormSubmitValidateSuccess => "onFormSubmitValidateSuccess",
            LifeCycleType::OnFormSubmitValidateFailed => "onFormSubmitValidateFailed",
            LifeCycleType::OnFormOnSubmitSuccess => "onFormOnSubmitSuccess",
            LifeCycleType::OnFormOnSubmitFailed => "onFormOnSubmitFailed",
            LifeCycleType::OnFormValidateStart => "onFormValidateStart",
            LifeCycleType::OnFormValidateEnd => "onFormValidateEnd",
            LifeCycleType::OnFormValuesChange => "onFormValuesChange",
            LifeCycleType::OnFormInitialValuesChange => "onFormInitialValuesChange",
            LifeCycleType::OnFormInputChange => "onFormInputChange",
            LifeCycleType::OnFormHostRender => "onFormHostRender",
            LifeCycleType::OnFieldWillInit => "onFieldWillInit",
            LifeCycleType::OnFieldInit => "onFieldInit",
            LifeCycleType::OnFieldChange => "onFieldChange",
            LifeCycleType::OnFieldInputChange => "onFieldInputChange",
            LifeCycleType::OnFieldValueChange => "onFieldValueChange",
            LifeCycleType::OnFieldInitialValueChange => "onFieldInitialValueChange",
            LifeCycleType::OnFieldValidateStart => "onFieldValidateStart",
            LifeCycleType::OnFieldValidateEnd => "onFieldValidateEnd",
            LifeCycleType::OnFieldMount => "onFieldMount",
            LifeCycleType::OnFieldUnmount => "onFieldUnmount",
            LifeCycleType::Custom(name) => name,
        }
    }
}

/// Snapshot payload carried by a lifecycle event
#[derive(Clone, Debug)]
pub enum LifeCyclePayload {
    Form(Box<FormState>),
    Field {
        path: FormPath,
        state: Box<FieldState>,
    },
    Virtual {
        path: FormPath,
        state: Box<VirtualFieldState>,
    },
    Custom(Value),
    None,
}

impl LifeCyclePayload {
    /// Path of the originating node, if the payload has one
    pub fn path(&self) -> Option<&FormPath> {
        match self {
            LifeCyclePayload::Field { path, .. } | LifeCyclePayload::Virtual { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldState> {
        match self {
            LifeCyclePayload::Field { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormState> {
        match self {
            LifeCyclePayload::Form(state) => Some(state),
            _ => None,
        }
    }
}

/// One published lifecycle event
#[derive(Clone, Debug)]
pub struct LifeCycleEvent {
    pub event_type: LifeCycleType,
    pub payload: LifeCyclePayload,
}

/// Subscriber callback
pub type HeartSubscriber = Arc<dyn Fn(&LifeCycleEvent) + Send + Sync>;

struct HeartInner {
    batch_depth: u32,
    buffer: Vec<LifeCycleEvent>,
}

/// Lifecycle event hub
pub struct Heart {
    subscribers: Mutex<SlotMap<HeartSubscriberId, HeartSubscriber>>,
    inner: Mutex<HeartInner>,
}

impl Heart {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(SlotMap::with_key()),
            inner: Mutex::new(HeartInner {
                batch_depth: 0,
                buffer: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&LifeCycleEvent) + Send + Sync + 'static) -> HeartSubscriberId {
        self.subscribers.lock().unwrap().insert(Arc::new(callback))
    }

    pub fn subscribe_arc(&self, callback: HeartSubscriber) -> HeartSubscriberId {
        self.subscribers.lock().unwrap().insert(callback)
    }

    pub fn unsubscribe(&self, id: HeartSubscriberId) {
        self.subscribers.lock().unwrap().remove(id);
    }

    /// Publish an event, or buffer it while a batch scope is open
    pub fn publish(&self, event_type: LifeCycleType, payload: LifeCyclePayload) {
        let event = LifeCycleEvent {
            event_type,
            payload,
        };
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.batch_depth > 0 {
                inner.buffer.push(event);
                return;
            }
        }
        self.dispatch(&event);
    }

    /// Buffer publishes inside `f` and flush them in order afterwards
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.lock().unwrap().batch_depth += 1;
        let result = f();
        let flushed = {
            let mut inner = self.inner.lock().unwrap();
            inner.batch_depth -= 1;
            if inner.batch_depth == 0 {
                std::mem::take(&mut inner.buffer)
            } else {
                Vec::new()
            }
        };
        for event in &flushed {
            self.dispatch(event);
        }
        result
    }

    fn dispatch(&self, event: &LifeCycleEvent) {
        let subscribers: Vec<HeartSubscriber> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        for subscriber in subscribers {
            subscriber(event);
        }
    }
}

impl Default for Heart {
    fn default() -> Self {
        Self::new()
    }
}
