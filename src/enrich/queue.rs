use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use crate::types::FunctionKey;

/// One function waiting for enrichment, with the body hash seen at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFunction {
    pub key: FunctionKey,
    pub body_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued,
    /// Waiting or in flight.
    AlreadyQueued,
    /// Processed with the same body hash.
    AlreadyProcessed,
    Full,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedFunction>,
    /// Keys that are pending or in flight.
    queued: HashSet<FunctionKey>,
    processed: HashMap<FunctionKey, String>,
}

/// Bounded FIFO of distinct function identities.
///
/// A key stays in the queued set from `enqueue` until `complete` or `fail`,
/// so it cannot be queued twice while it is being worked on.
#[derive(Debug)]
pub struct EnrichmentQueue {
    capacity: usize,
    state: Mutex<QueueState>,
}

impl EnrichmentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn enqueue(&self, key: FunctionKey, body_hash: impl Into<String>) -> EnqueueOutcome {
        let body_hash = body_hash.into();
        let mut state = self.lock();
        if state.queued.contains(&key) {
            return EnqueueOutcome::AlreadyQueued;
        }
        if state.processed.get(&key) == Some(&body_hash) {
            return EnqueueOutcome::AlreadyProcessed;
        }
        if state.pending.len() >= self.capacity {
            tracing::warn!(function = %key, capacity = self.capacity, "enrichment queue full");
            return EnqueueOutcome::Full;
        }
        state.queued.insert(key.clone());
        state.pending.push_back(QueuedFunction { key, body_hash });
        EnqueueOutcome::Queued
    }

    /// Take the oldest waiting item. Its key stays reserved until
    /// [`complete`](Self::complete) or [`fail`](Self::fail).
    pub fn pop(&self) -> Option<QueuedFunction> {
        self.lock().pending.pop_front()
    }

    pub fn complete(&self, key: &FunctionKey, body_hash: impl Into<String>) {
        let mut state = self.lock();
        state.queued.remove(key);
        state.processed.insert(key.clone(), body_hash.into());
    }

    /// Release a key without marking it processed; a later reparse may queue it again.
    pub fn fail(&self, key: &FunctionKey) {
        self.lock().queued.remove(key);
    }

    /// Number of items waiting (in-flight items excluded).
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> FunctionKey {
        FunctionKey::new(name, "/p/a.ts")
    }

    #[test]
    fn test_fifo_order() {
        let queue = EnrichmentQueue::new(10);
        queue.enqueue(key("a"), "1");
        queue.enqueue(key("b"), "1");
        assert_eq!(queue.pop().unwrap().key, key("a"));
        assert_eq!(queue.pop().unwrap().key, key("b"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_never_holds_a_key_twice() {
        let queue = EnrichmentQueue::new(10);
        assert_eq!(queue.enqueue(key("a"), "1"), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(key("a"), "2"), EnqueueOutcome::AlreadyQueued);
        assert_eq!(queue.len(), 1);

        // Still reserved while in flight.
        let item = queue.pop().unwrap();
        assert_eq!(queue.enqueue(key("a"), "1"), EnqueueOutcome::AlreadyQueued);
        queue.complete(&item.key, &item.body_hash);
        assert_eq!(queue.processed_count(), 1);
    }

    #[test]
    fn test_processed_key_requeues_only_on_new_hash() {
        let queue = EnrichmentQueue::new(10);
        queue.enqueue(key("a"), "1");
        let item = queue.pop().unwrap();
        queue.complete(&item.key, "1");

        assert_eq!(queue.enqueue(key("a"), "1"), EnqueueOutcome::AlreadyProcessed);
        assert_eq!(queue.enqueue(key("a"), "2"), EnqueueOutcome::Queued);
    }

    #[test]
    fn test_failed_key_can_be_queued_again() {
        let queue = EnrichmentQueue::new(10);
        queue.enqueue(key("a"), "1");
        let item = queue.pop().unwrap();
        queue.fail(&item.key);

        assert_eq!(queue.processed_count(), 0);
        assert_eq!(queue.enqueue(key("a"), "1"), EnqueueOutcome::Queued);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let queue = EnrichmentQueue::new(2);
        queue.enqueue(key("a"), "1");
        queue.enqueue(key("b"), "1");
        assert_eq!(queue.enqueue(key("c"), "1"), EnqueueOutcome::Full);
        queue.pop();
        assert_eq!(queue.enqueue(key("c"), "1"), EnqueueOutcome::Queued);
    }
}
