use parking_lot::RwLock;
use std::collections::HashMap;

/// Thread-safe mapping from string keys to opaque byte values.
///
/// A single reader-writer lock over the whole map keeps the snapshot
/// operations consistent: a snapshot taken while writers are active reflects
/// one point in time, never a torn view of a concurrent put and delete on
/// the same key.
#[derive(Default)]
pub struct LocalStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: Vec<u8>) {
        self.data.write().insert(key.into(), value);
    }

    /// Removes `key`; `true` when it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.data.write().remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.data.read().len()
    }

    pub fn clear(&self) {
        self.data.write().clear();
    }

    /// Snapshot of all current keys.
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Snapshot of every entry whose key satisfies `pred`. Used by ownership
    /// transfer to carve out the arc of keys that moved to another node.
    pub fn snapshot_where<F>(&self, pred: F) -> Vec<(String, Vec<u8>)>
    where
        F: Fn(&str) -> bool,
    {
        self.data
            .read()
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
