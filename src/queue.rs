// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Key-coalescing delta queue.
//!
//! Each export controller feeds observed changes through a [`DeltaQueue`]: an ordered FIFO of
//! per-object delta lists keyed by `"namespace/name"`. A key occupies a single queue slot no
//! matter how many deltas pile up for it, so a hot object cannot starve the rest of the queue,
//! and the drain side always sees the deltas of one object in the order they were observed.
//!
//! Resyncs go through [`DeltaQueue::replace`], which records the authoritative list as `Sync`
//! deltas and synthesizes reference-only `Deleted` deltas for objects the repository still knows
//! about but the fresh list no longer contains. That is the half of the two-way sync that
//! recovers deletions missed while the tool was not running.

use crate::resource::ResourceRef;

use kube::core::DynamicObject;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Kind of change a delta describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// Object appeared while watching.
    Added,

    /// Object changed while watching.
    Updated,

    /// Object disappeared, either observed by the watch or synthesized by a resync.
    Deleted,

    /// Object reported as current authoritative state by a list.
    Sync,
}

/// One observed change for one object.
#[derive(Debug, Clone)]
pub struct Delta {
    /// Kind of change.
    pub kind: DeltaKind,

    /// Identity of the changed object.
    pub reference: ResourceRef,

    /// Payload at observation time. [`None`] for deletions synthesized from the key index,
    /// where only the reference survives (deleted final state unknown).
    pub object: Option<DynamicObject>,
}

#[derive(Default)]
struct Inner {
    deltas: HashMap<String, Vec<Delta>>,
    order: VecDeque<String>,
}

/// Ordered FIFO of per-key delta lists.
#[derive(Default)]
pub struct DeltaQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl DeltaQueue {
    /// Construct a new empty queue.
    pub fn new() -> Self {
        DeltaQueue::default()
    }

    /// Append a delta for its key, enqueueing the key if it is not already pending.
    pub fn push(&self, delta: Delta) {
        let key = delta.reference.namespaced_name();

        let mut inner = self.inner.lock().unwrap();
        match inner.deltas.get_mut(&key) {
            Some(pending) => pending.push(delta),
            None => {
                inner.deltas.insert(key.clone(), vec![delta]);
                inner.order.push_back(key);
            }
        }
        drop(inner);

        self.notify.notify_one();
    }

    /// Record the authoritative state of a fresh list.
    ///
    /// Every listed object becomes a `Sync` delta. Every dangling reference, one the caller
    /// knows about locally but the list no longer contains, becomes a reference-only `Deleted`
    /// delta.
    pub fn replace(
        &self,
        listed: impl IntoIterator<Item = (ResourceRef, DynamicObject)>,
        dangling: impl IntoIterator<Item = ResourceRef>,
    ) {
        for (reference, object) in listed {
            self.push(Delta { kind: DeltaKind::Sync, reference, object: Some(object) });
        }
        for reference in dangling {
            self.push(Delta { kind: DeltaKind::Deleted, reference, object: None });
        }
    }

    /// Put a failed item back at the front of the queue for retry.
    ///
    /// Deltas observed while the item was being handled are appended after the retried ones,
    /// preserving the merged order.
    pub fn requeue(&self, key: String, mut deltas: Vec<Delta>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(newer) = inner.deltas.remove(&key) {
            // A push that raced the retry re-enqueued the key at the back; merge its deltas
            // and reposition the key up front.
            deltas.extend(newer);
            inner.order.retain(|queued| queued != &key);
        }
        inner.deltas.insert(key.clone(), deltas);
        inner.order.push_front(key);
        drop(inner);

        self.notify.notify_one();
    }

    /// Wait for the next pending key and take all of its coalesced deltas.
    pub async fn pop(&self) -> (String, Vec<Delta>) {
        loop {
            let notified = self.notify.notified();

            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(key) = inner.order.pop_front() {
                    let deltas = inner.deltas.remove(&key).unwrap_or_default();
                    return (key, deltas);
                }
            }

            notified.await;
        }
    }

    /// Number of keys currently pending.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    /// Whether no keys are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn reference(key: &str) -> ResourceRef {
        ResourceRef::from_key("Service", key)
    }

    fn delta(kind: DeltaKind, key: &str) -> Delta {
        Delta { kind, reference: reference(key), object: None }
    }

    fn kinds(deltas: &[Delta]) -> Vec<DeltaKind> {
        deltas.iter().map(|d| d.kind).collect()
    }

    #[tokio::test]
    async fn pop_returns_keys_in_fifo_order() {
        let queue = DeltaQueue::new();
        queue.push(delta(DeltaKind::Added, "ns1/a"));
        queue.push(delta(DeltaKind::Added, "ns1/b"));
        queue.push(delta(DeltaKind::Added, "ns1/c"));

        assert_eq!(queue.pop().await.0, "ns1/a");
        assert_eq!(queue.pop().await.0, "ns1/b");
        assert_eq!(queue.pop().await.0, "ns1/c");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn coalesces_deltas_per_key() {
        let queue = DeltaQueue::new();
        queue.push(delta(DeltaKind::Added, "ns1/a"));
        queue.push(delta(DeltaKind::Added, "ns1/b"));
        queue.push(delta(DeltaKind::Updated, "ns1/a"));
        queue.push(delta(DeltaKind::Deleted, "ns1/a"));

        assert_eq!(queue.len(), 2);

        let (key, deltas) = queue.pop().await;
        assert_eq!(key, "ns1/a");
        assert_eq!(kinds(&deltas), vec![DeltaKind::Added, DeltaKind::Updated, DeltaKind::Deleted]);

        let (key, deltas) = queue.pop().await;
        assert_eq!(key, "ns1/b");
        assert_eq!(kinds(&deltas), vec![DeltaKind::Added]);
    }

    #[tokio::test]
    async fn replace_synthesizes_deletions_for_dangling_keys() {
        let queue = DeltaQueue::new();
        let listed: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "a", "namespace": "ns1" },
        }))
        .unwrap();

        queue.replace(
            [(reference("ns1/a"), listed)],
            [reference("ns1/gone")],
        );

        let (key, deltas) = queue.pop().await;
        assert_eq!(key, "ns1/a");
        assert_eq!(kinds(&deltas), vec![DeltaKind::Sync]);
        assert!(deltas[0].object.is_some());

        let (key, deltas) = queue.pop().await;
        assert_eq!(key, "ns1/gone");
        assert_eq!(kinds(&deltas), vec![DeltaKind::Deleted]);
        assert!(deltas[0].object.is_none());
    }

    #[tokio::test]
    async fn requeue_puts_item_back_at_the_front() {
        let queue = DeltaQueue::new();
        queue.push(delta(DeltaKind::Added, "ns1/a"));
        queue.push(delta(DeltaKind::Added, "ns1/b"));

        let (key, deltas) = queue.pop().await;
        assert_eq!(key, "ns1/a");
        queue.requeue(key, deltas);

        assert_eq!(queue.pop().await.0, "ns1/a");
        assert_eq!(queue.pop().await.0, "ns1/b");
    }

    #[tokio::test]
    async fn requeue_merges_with_newer_deltas() {
        let queue = DeltaQueue::new();
        queue.push(delta(DeltaKind::Added, "ns1/a"));
        queue.push(delta(DeltaKind::Added, "ns1/b"));

        let (key, deltas) = queue.pop().await;
        assert_eq!(key, "ns1/a");
        // A delta that races the retry lands the key at the back of the queue; the requeue
        // must merge it and still put the retried item back at the front.
        queue.push(delta(DeltaKind::Updated, "ns1/a"));
        queue.requeue(key, deltas);

        let (key, merged) = queue.pop().await;
        assert_eq!(key, "ns1/a");
        assert_eq!(kinds(&merged), vec![DeltaKind::Added, DeltaKind::Updated]);

        assert_eq!(queue.pop().await.0, "ns1/b");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_wakes_up_on_push() {
        let queue = std::sync::Arc::new(DeltaQueue::new());

        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.push(delta(DeltaKind::Added, "ns1/late"));

        let (key, _) = popper.await.unwrap();
        assert_eq!(key, "ns1/late");
    }
}
