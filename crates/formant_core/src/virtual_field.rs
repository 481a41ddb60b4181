//! Non-data structural node
//!
//! Virtual fields represent layout/structural nodes (groups, array wrappers)
//! that hold no value but participate in visibility propagation and the
//! mounting lifecycle.

use crate::model::{Model, StateType, SubscriberId};
use formant_path::FormPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;

/// Observable state of a structural node
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualFieldState {
    pub name: String,
    pub path: FormPath,
    pub initialized: bool,
    pub visible: bool,
    pub display: bool,
    pub mounted: bool,
    pub unmounted: bool,
    pub props: Value,
}

impl Default for VirtualFieldState {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: FormPath::root(),
            initialized: false,
            visible: true,
            display: true,
            mounted: false,
            unmounted: false,
            props: Value::Null,
        }
    }
}

/// Declared keys of `VirtualFieldState`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VirtualFieldStateKey {
    Initialized,
    Visible,
    Display,
    Mounted,
    Unmounted,
    Props,
}

impl VirtualFieldStateKey {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "initialized" => Self::Initialized,
            "visible" => Self::Visible,
            "display" => Self::Display,
            "mounted" => Self::Mounted,
            "unmounted" => Self::Unmounted,
            "props" => Self::Props,
            _ => return None,
        })
    }
}

impl StateType for VirtualFieldState {
    type Key = VirtualFieldStateKey;

    const ALL_KEYS: &'static [VirtualFieldStateKey] = &[
        VirtualFieldStateKey::Initialized,
        VirtualFieldStateKey::Visible,
        VirtualFieldStateKey::Display,
        VirtualFieldStateKey::Mounted,
        VirtualFieldStateKey::Unmounted,
        VirtualFieldStateKey::Props,
    ];

    fn diff(prev: &Self, next: &Self) -> SmallVec<[VirtualFieldStateKey; 8]> {
        let mut changed = SmallVec::new();
        if prev.initialized != next.initialized {
            changed.push(VirtualFieldStateKey::Initialized);
        }
        if prev.visible != next.visible {
            changed.push(VirtualFieldStateKey::Visible);
        }
        if prev.display != next.display {
            changed.push(VirtualFieldStateKey::Display);
        }
        if prev.mounted != next.mounted {
            changed.push(VirtualFieldStateKey::Mounted);
        }
        if prev.unmounted != next.unmounted {
            changed.push(VirtualFieldStateKey::Unmounted);
        }
        if prev.props != next.props {
            changed.push(VirtualFieldStateKey::Props);
        }
        changed
    }
}

/// A structural graph node without data
pub struct VirtualField {
    model: Model<VirtualFieldState>,
    path: FormPath,
}

impl VirtualField {
    pub fn new(path: FormPath, use_dirty: bool) -> Arc<Self> {
        let state = VirtualFieldState {
            name: path.to_string(),
            path: path.clone(),
            ..Default::default()
        };
        Arc::new(Self {
            model: Model::with_dirty_tracking(state, use_dirty),
            path,
        })
    }

    pub fn path(&self) -> &FormPath {
        &self.path
    }

    pub fn model(&self) -> &Model<VirtualFieldState> {
        &self.model
    }

    pub fn state(&self) -> VirtualFieldState {
        self.model.state()
    }

    pub fn get_state<R>(&self, selector: impl FnOnce(&VirtualFieldState) -> R) -> R {
        self.model.get_state(selector)
    }

    pub fn set_state(&self, mutator: impl FnOnce(&mut VirtualFieldState)) {
        self.model.set_state(mutator);
    }

    pub fn set_state_silent(&self, mutator: impl FnOnce(&mut VirtualFieldState)) {
        self.model.set_state_silent(mutator);
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.model.batch(f)
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&VirtualFieldState, &crate::model::DirtySet<VirtualFieldState>)
            + Send
            + Sync
            + 'static,
    ) -> SubscriberId {
        self.model.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_field_has_no_value_state() {
        let vfield = VirtualField::new(FormPath::parse("layout.card"), true);
        assert_eq!(vfield.get_state(|s| s.name.clone()), "layout.card");
        assert!(vfield.get_state(|s| s.visible && s.display));
    }

    #[test]
    fn test_visibility_dirty_tracking() {
        let vfield = VirtualField::new(FormPath::parse("group"), true);
        let changed = vfield.model().apply(|s| s.visible = false);
        assert_eq!(changed.as_slice(), &[VirtualFieldStateKey::Visible]);
    }
}
