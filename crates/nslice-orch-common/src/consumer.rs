//! Per-key coalescing queue for resource lifecycle events.
//!
//! Queued tasks for one key are folded together so a burst of updates for a
//! resource costs one cycle:
//!
//! * Set after Set: payloads are coalesced into the queued Set
//! * Del: drops whatever is queued for the key, then queues itself
//! * Set after Del: kept behind the Del, so a recreate follows the teardown

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Debug, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create, update or resync.
    Set,
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }

    fn label(&self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Del => "DEL",
        }
    }
}

/// Payloads that can absorb a newer payload for the same key.
pub trait Coalesce {
    fn coalesce(&mut self, newer: Self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyedTask<K, T> {
    pub key: K,
    pub op: Operation,
    pub payload: T,
}

impl<K, T> KeyedTask<K, T> {
    pub fn set(key: K, payload: T) -> Self {
        Self {
            key,
            op: Operation::Set,
            payload,
        }
    }

    pub fn del(key: K, payload: T) -> Self {
        Self {
            key,
            op: Operation::Del,
            payload,
        }
    }
}

/// Named queue of [`KeyedTask`]s, ordered by key.
pub struct Consumer<K, T> {
    name: String,
    queues: BTreeMap<K, VecDeque<KeyedTask<K, T>>>,
}

impl<K, T> Consumer<K, T>
where
    K: Ord + Clone + Display,
    T: Coalesce + Debug,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_pending(&self) -> bool {
        !self.queues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.queues.contains_key(key)
    }

    pub fn add_to_sync(&mut self, tasks: impl IntoIterator<Item = KeyedTask<K, T>>) {
        for task in tasks {
            self.push(task);
        }
    }

    fn push(&mut self, task: KeyedTask<K, T>) {
        let queue = self.queues.entry(task.key.clone()).or_default();
        if task.op.is_del() {
            queue.clear();
        } else if let Some(last) = queue.back_mut().filter(|last| last.op.is_set()) {
            last.payload.coalesce(task.payload);
            return;
        }
        queue.push_back(task);
    }

    /// Takes every queued task, in key order.
    pub fn drain(&mut self) -> Vec<KeyedTask<K, T>> {
        std::mem::take(&mut self.queues).into_values().flatten().collect()
    }

    /// Takes the oldest task of every key for which `ready` holds; other
    /// keys keep their queue untouched.
    pub fn pop_ready(&mut self, mut ready: impl FnMut(&K) -> bool) -> Vec<KeyedTask<K, T>> {
        let result: Vec<_> = self
            .queues
            .iter_mut()
            .filter(|(key, _)| ready(*key))
            .filter_map(|(_, queue)| queue.pop_front())
            .collect();
        self.queues.retain(|_, q| !q.is_empty());
        result
    }

    /// Puts a task back in front of its key's queue.
    pub fn retry(&mut self, task: KeyedTask<K, T>) {
        self.queues.entry(task.key.clone()).or_default().push_front(task);
    }

    pub fn dump(&self) -> Vec<String> {
        self.queues
            .iter()
            .flat_map(|(key, queue)| {
                queue
                    .iter()
                    .map(move |t| format!("{} {}: {} {:?}", self.name, key, t.op.label(), t.payload))
            })
            .collect()
    }
}
