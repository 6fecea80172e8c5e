//! Grow-only log of observed values.
//!
//! Values can only be added, never removed. Membership is answered from a
//! hash set; the order of first observation is kept separately so reads
//! come back in a stable order.

use std::collections::HashSet;

/// A broadcast value.
pub type Value = i64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeenLog {
    seen: HashSet<Value>,
    order: Vec<Value>,
}

impl SeenLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`. Returns `true` the first time a value is observed and
    /// `false` for every repeat, which leaves the log untouched.
    pub fn observe(&mut self, value: Value) -> bool {
        if !self.seen.insert(value) {
            return false;
        }
        self.order.push(value);
        true
    }

    /// Record every value in `values`, returning the ones that were new in
    /// the order they were first observed.
    pub fn observe_all(&mut self, values: impl IntoIterator<Item = Value>) -> Vec<Value> {
        values.into_iter().filter(|v| self.observe(*v)).collect()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.seen.contains(value)
    }

    /// Values in order of first observation.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.order.iter()
    }

    /// Owned copy of the log, safe to hand out while the log keeps growing.
    pub fn snapshot(&self) -> Vec<Value> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Extend<Value> for SeenLog {
    fn extend<I: IntoIterator<Item = Value>>(&mut self, values: I) {
        for value in values {
            self.observe(value);
        }
    }
}

impl FromIterator<Value> for SeenLog {
    fn from_iter<I: IntoIterator<Item = Value>>(values: I) -> Self {
        let mut log = SeenLog::new();
        log.extend(values);
        log
    }
}
