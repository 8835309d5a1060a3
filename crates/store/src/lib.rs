//! kic store: informer cache, cluster index and the pipeline tying them to dispatch.

#![forbid(unsafe_code)]

pub mod index;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use kic_core::{
    recover_as, Notification, ObjectKey, Payload, ResourceKind, ResourceObject, SyncTarget, Tombstone, WatchEvent, Watched,
};
use kic_dispatch::Dispatcher;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use index::ClusterIndex;
pub use queue::TaskQueue;

/// Last-seen objects of one kind, keyed by `namespace/name`.
pub type Cache = FxHashMap<ObjectKey, ResourceObject>;

/// Per-kind last-seen cache turning raw watch events into notifications.
///
/// Each kind has a single writer (its watcher); readers get lock-free snapshots.
pub struct Informer {
    caches: FxHashMap<ResourceKind, ArcSwap<Cache>>,
}

impl Default for Informer {
    fn default() -> Self {
        Self::new()
    }
}

impl Informer {
    pub fn new() -> Self {
        let caches = ResourceKind::ALL.iter().map(|k| (*k, ArcSwap::from_pointee(Cache::default()))).collect();
        Self { caches }
    }

    fn slot(&self, kind: ResourceKind) -> &ArcSwap<Cache> {
        // every kind is inserted by `new`
        &self.caches[&kind]
    }

    pub fn snapshot(&self, kind: ResourceKind) -> Arc<Cache> {
        self.slot(kind).load_full()
    }

    /// Typed view of the cached objects of `T`, ordered by key.
    pub fn list<T: Watched>(&self) -> Vec<T> {
        let snap = self.snapshot(T::KIND);
        let mut keyed: Vec<_> = snap.iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        keyed.into_iter().filter_map(|(_, o)| T::from_object(o.clone()).ok()).collect()
    }

    /// Apply one watch event for `kind` and return the notifications it implies.
    ///
    /// Objects missing from a relist were deleted while the watch was down; they
    /// come out as removals carrying a [`Tombstone`]. Objects of another kind are
    /// dropped and never enter the cache.
    pub fn apply(&self, kind: ResourceKind, event: WatchEvent) -> Vec<Notification> {
        let slot = self.slot(kind);
        let mut next: Cache = (*slot.load_full()).clone();
        let mut out = Vec::new();
        match event {
            WatchEvent::Applied(obj) => match of_kind(kind, obj) {
                Some(obj) => out.push(upsert(&mut next, obj)),
                None => return out,
            },
            WatchEvent::Deleted(obj) => match of_kind(kind, obj) {
                Some(obj) => {
                    next.remove(&obj.key());
                    out.push(Notification::Removed(Payload::Object(obj)));
                }
                None => return out,
            },
            WatchEvent::Restarted(list) => {
                debug!(kind = %kind, count = list.len(), "watch restart");
                let mut fresh = Cache::default();
                for obj in list.into_iter().filter_map(|o| of_kind(kind, o)) {
                    let key = obj.key();
                    let n = match next.remove(&key) {
                        Some(old) => Notification::Updated(old.into(), obj.clone().into()),
                        None => Notification::Added(obj.clone().into()),
                    };
                    fresh.insert(key, obj);
                    out.push(n);
                }
                let mut gone: Vec<_> = next.drain().collect();
                gone.sort_by(|a, b| a.0.cmp(&b.0));
                for (key, last_known) in gone {
                    out.push(Notification::Removed(Payload::Tombstone(Tombstone { key, last_known })));
                }
                next = fresh;
            }
        }
        slot.store(Arc::new(next));
        out
    }
}

fn of_kind(kind: ResourceKind, obj: ResourceObject) -> Option<ResourceObject> {
    match recover_as(kind, Payload::Object(obj)) {
        Ok(obj) => Some(obj),
        Err(e) => {
            warn!(kind = %kind, error = %e, "dropping watch event");
            None
        }
    }
}

fn upsert(cache: &mut Cache, obj: ResourceObject) -> Notification {
    match cache.insert(obj.key(), obj.clone()) {
        Some(old) => Notification::Updated(old.into(), obj.into()),
        None => Notification::Added(obj.into()),
    }
}

/// Feed one watch event through the informer and the dispatcher.
pub fn ingest(informer: &Informer, dispatcher: &Dispatcher, kind: ResourceKind, event: WatchEvent) {
    for n in informer.apply(kind, event) {
        dispatcher.dispatch(kind, n);
    }
}

/// Spawn the ingest loop: watch events in, drained sync targets out.
///
/// The queue is drained on a fixed tick; each non-empty batch is sent on the returned receiver.
pub fn spawn_pipeline(
    informer: Arc<Informer>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<TaskQueue>,
    cap: usize,
    tick: Duration,
) -> (mpsc::Sender<(ResourceKind, WatchEvent)>, mpsc::Receiver<Vec<SyncTarget>>) {
    let (tx, mut rx) = mpsc::channel::<(ResourceKind, WatchEvent)>(cap);
    let (out_tx, out_rx) = mpsc::channel::<Vec<SyncTarget>>(cap);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some((kind, event)) => ingest(&informer, &dispatcher, kind, event),
                        None => {
                            debug!("watch channel closed; draining and exiting ingest loop");
                            let batch = queue.drain_ready();
                            if !batch.is_empty() {
                                let _ = out_tx.send(batch).await;
                            }
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let batch = queue.drain_ready();
                    if !batch.is_empty() && out_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!("ingest loop stopped");
    });

    (tx, out_rx)
}
