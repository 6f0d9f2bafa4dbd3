use std::sync::Arc;

use dashmap::DashMap;

use crate::slot::Slot;

/// Key to slot map shared by every request.
///
/// A key has a slot only while a pairing is pending or in progress.
pub struct Registry<S> {
    slots: DashMap<String, Arc<Slot<S>>>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self { slots: DashMap::new() }
    }
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the slot for `key`, creating it if there is none. Concurrent callers for the same
    /// key always get the same slot.
    pub fn get_or_create(&self, key: &str) -> Arc<Slot<S>> {
        if let Some(slot) = self.slots.get(key) {
            return slot.value().clone();
        }
        self.slots.entry(key.to_string()).or_insert_with(|| Arc::new(Slot::new())).value().clone()
    }

    /// Removes `key` only while it still maps to `slot`, so a late cleanup never drops a newer
    /// slot for the same key.
    pub fn remove(&self, key: &str, slot: &Arc<Slot<S>>) -> bool {
        self.slots.remove_if(key, |_, current| Arc::ptr_eq(current, slot)).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_slot() {
        let registry = Registry::<()>::new();
        let first = registry.get_or_create("/x");
        let second = registry.get_or_create("/x");
        let other = registry.get_or_create("/x?y=1");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_is_identity_checked() {
        let registry = Registry::<()>::new();
        let old = registry.get_or_create("/x");
        assert!(registry.remove("/x", &old));
        assert!(!registry.contains("/x"));

        let new = registry.get_or_create("/x");
        assert!(!registry.remove("/x", &old));
        assert!(registry.contains("/x"));

        assert!(registry.remove("/x", &new));
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_creation() {
        let registry = Arc::new(Registry::<()>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create("/race"))
            })
            .collect();

        let slots: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        assert!(slots.iter().all(|slot| Arc::ptr_eq(slot, &slots[0])));
        assert_eq!(registry.len(), 1);
    }
}
