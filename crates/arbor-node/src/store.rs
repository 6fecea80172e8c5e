//! Shared, deduplicating value store.

use arbor_core::{SeenLog, Value};
use parking_lot::Mutex;

/// Every value this node has observed.
///
/// The membership check, insert and append happen under one lock, so two
/// peers delivering the same value at the same time cannot both see it as
/// new and both fan it out.
#[derive(Debug, Default)]
pub struct DedupStore {
    log: Mutex<SeenLog>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`, returning whether it was new.
    pub fn observe(&self, value: Value) -> bool {
        self.log.lock().observe(value)
    }

    /// Record a batch under a single lock acquisition, returning the values
    /// that were new.
    pub fn observe_all(&self, values: impl IntoIterator<Item = Value>) -> Vec<Value> {
        self.log.lock().observe_all(values)
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.log.lock().contains(value)
    }

    /// Copy of everything observed so far, in first-seen order.
    pub fn snapshot(&self) -> Vec<Value> {
        self.log.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_repeat_observe_leaves_store_unchanged() {
        let store = DedupStore::new();
        assert!(store.observe(5));
        let before = store.snapshot();

        assert!(!store.observe(5));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_concurrent_observers_agree_on_one_winner() {
        let store = Arc::new(DedupStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || (0..500).filter(|v| store.observe(*v)).count())
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 500);
        assert_eq!(store.len(), 500);
    }
}
