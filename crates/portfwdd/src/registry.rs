//! Live resource registry.
//!
//! Maps a rule's identity key to the handle of the resource backing it in
//! this process. Handles are never persisted and are only ever addressed by
//! key; the desired-state table decides which keys exist.

use std::collections::HashMap;

use tracing::debug;

use portfwd_common::ResourceHandle;

use crate::keys::RuleKey;

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    handles: HashMap<RuleKey, ResourceHandle>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the handle for `key`, returning any handle it replaces.
    pub fn insert(&mut self, key: RuleKey, handle: ResourceHandle) -> Option<ResourceHandle> {
        debug!(key = %key, ?handle, "Registering live resource");
        self.handles.insert(key, handle)
    }

    /// Removes and returns the handle for `key`.
    pub fn take(&mut self, key: &RuleKey) -> Option<ResourceHandle> {
        self.handles.remove(key)
    }

    pub fn get(&self, key: &RuleKey) -> Option<ResourceHandle> {
        self.handles.get(key).copied()
    }

    pub fn contains(&self, key: &RuleKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RuleKey, ResourceHandle)> {
        self.handles.iter().map(|(k, h)| (k, *h))
    }

    /// Number of tracked handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
