//! Coalescing sync queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use kic_core::SyncTarget;
use kic_dispatch::SyncQueue;
use metrics::counter;
use rustc_hash::FxHashSet;

/// FIFO of targets with duplicate suppression and fixed capacity.
struct Coalescer {
    queued: FxHashSet<SyncTarget>,
    order: VecDeque<SyncTarget>,
    cap: usize,
    dropped: u64,
}

impl Coalescer {
    fn push(&mut self, t: SyncTarget) {
        if self.queued.contains(&t) {
            return;
        }
        if self.order.len() >= self.cap {
            if let Some(old) = self.order.pop_front() {
                self.queued.remove(&old);
                self.dropped += 1;
                counter!("kic_queue_dropped_total", 1u64);
            }
        }
        self.queued.insert(t.clone());
        self.order.push_back(t);
    }

    fn drain(&mut self) -> Vec<SyncTarget> {
        self.queued.clear();
        self.order.drain(..).collect()
    }
}

/// Thread-safe coalescing queue; `add` never blocks on consumers.
pub struct TaskQueue {
    inner: Mutex<Coalescer>,
}

impl TaskQueue {
    pub fn with_capacity(cap: usize) -> Self {
        let inner = Coalescer { queued: FxHashSet::default(), order: VecDeque::new(), cap: cap.max(1), dropped: 0 };
        Self { inner: Mutex::new(inner) }
    }

    fn lock(&self) -> MutexGuard<'_, Coalescer> {
        // a panicking writer leaves the queue structurally intact
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Targets evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Drain all queued targets in insertion order.
    pub fn drain_ready(&self) -> Vec<SyncTarget> {
        self.lock().drain()
    }
}

impl SyncQueue for TaskQueue {
    fn add(&self, target: SyncTarget) {
        self.lock().push(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kic_core::{ObjectKey, ResourceKind};

    fn t(name: &str) -> SyncTarget {
        SyncTarget { kind: ResourceKind::Ingress, key: ObjectKey::new(Some("default"), name) }
    }

    #[test]
    fn duplicates_coalesce_and_order_is_kept() {
        let q = TaskQueue::with_capacity(8);
        q.add(t("a"));
        q.add(t("b"));
        q.add(t("a"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.drain_ready(), vec![t("a"), t("b")]);
        assert!(q.is_empty());
        q.add(t("a"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let q = TaskQueue::with_capacity(2);
        q.add(t("a"));
        q.add(t("b"));
        q.add(t("c"));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.drain_ready(), vec![t("b"), t("c")]);
    }

    #[test]
    fn same_key_different_kind_is_distinct() {
        let q = TaskQueue::with_capacity(8);
        q.add(t("a"));
        q.add(SyncTarget { kind: ResourceKind::Secret, ..t("a") });
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn poisoned_lock_keeps_accepting_targets() {
        let q = std::sync::Arc::new(TaskQueue::with_capacity(8));
        q.add(t("a"));
        let q2 = q.clone();
        let res = std::thread::spawn(move || {
            let _guard = q2.inner.lock().unwrap();
            panic!("writer died");
        })
        .join();
        assert!(res.is_err());
        assert!(q.inner.is_poisoned());

        q.add(t("b"));
        assert_eq!(q.drain_ready(), vec![t("a"), t("b")]);
    }
}
