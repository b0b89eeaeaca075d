// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Long-running export controller.
//!
//! One [`ExportController`] runs per kind. Its reflector drives the delta queue from the
//! cluster: a fresh list produces `Sync` deltas plus synthesized deletions for objects the
//! repository still has on disk, then a watch streams live changes until it fails, the resync
//! period elapses, or shutdown is requested. The drain side pops coalesced deltas, sanitizes
//! payloads, and publishes [`Resource`] records to the saver.
//!
//! Failures while handling an item send it through the retry manager: up to five attempts,
//! each retry gated by a token-bucket rate limiter so a persistently broken object cannot spin
//! the pipeline.

use crate::{
    cluster::KindSource,
    labels::Selector,
    queue::{Delta, DeltaKind, DeltaQueue},
    repo::WorkTree,
    resource::{Format, Resource, ResourceRef, ResourceStatus},
    sanitize::{Sanitize, SanitizeError},
    Error, Result,
};

use futures::StreamExt;
use kube::core::WatchEvent;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts after which a failing item is dropped.
const MAX_ATTEMPTS: u32 = 5;

/// Ceiling for the reflector's reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Long-running list/watch pipeline for a single kind.
pub struct ExportController {
    source: Arc<dyn KindSource>,
    sanitizer: Arc<dyn Sanitize>,
    selector: Selector,
    resync_period: Duration,
    format: Format,
    work_tree: WorkTree,
    resources: mpsc::Sender<Resource>,
}

impl ExportController {
    /// Construct a controller for one kind.
    ///
    /// The selector must already be composed from the user selector and the kind's built-in
    /// requirements; it is applied to both list and watch calls.
    pub fn new(
        source: Arc<dyn KindSource>,
        sanitizer: Arc<dyn Sanitize>,
        selector: Selector,
        resync_period: Duration,
        format: Format,
        work_tree: WorkTree,
        resources: mpsc::Sender<Resource>,
    ) -> Self {
        Self { source, sanitizer, selector, resync_period, format, work_tree, resources }
    }

    /// Run the reflector and the drain loop until the stop token fires.
    pub async fn run(self, stop: CancellationToken) {
        let kind = self.source.kind().to_string();
        info!("Starting export controller for {kind}s");

        let queue = Arc::new(DeltaQueue::new());
        let reflector = reflect(
            self.source,
            self.selector,
            self.resync_period,
            self.work_tree,
            self.format,
            queue.clone(),
            stop.clone(),
        );
        let drainer = drain(kind.clone(), queue, self.sanitizer, self.resources, stop);

        tokio::join!(reflector, drainer);
        debug!("Export controller for {kind}s stopped");
    }
}

/// Drive the delta queue from the cluster: list, reconcile, watch, repeat.
async fn reflect(
    source: Arc<dyn KindSource>,
    selector: Selector,
    resync_period: Duration,
    work_tree: WorkTree,
    format: Format,
    queue: Arc<DeltaQueue>,
    stop: CancellationToken,
) {
    let kind = source.kind().to_string();
    let mut backoff = Duration::from_secs(1);

    loop {
        let listed = tokio::select! {
            () = stop.cancelled() => return,
            result = source.list(&selector) => result,
        };
        let (items, version) = match listed {
            Ok(listed) => listed,
            Err(error) => {
                warn!("Failed to list {kind}s: {error}");
                if pause(&stop, &mut backoff).await.is_err() {
                    return;
                }
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        debug!("Listed {} {kind}s", items.len());

        // Two-way sync: anything we know on disk that the list no longer contains was
        // deleted while nobody was watching.
        let listed: Vec<(ResourceRef, _)> = items
            .into_iter()
            .map(|object| (ResourceRef::from_object(&kind, &object), object))
            .collect();
        let listed_keys: HashSet<String> =
            listed.iter().map(|(reference, _)| reference.namespaced_name()).collect();
        let dangling: Vec<ResourceRef> = work_tree
            .list_keys(&kind)
            .into_iter()
            .filter(|key| !listed_keys.contains(key))
            .filter_map(|key| work_tree.get_key(&kind, format, &key))
            .collect();
        if !dangling.is_empty() {
            info!("Found {} dangling {kind}s to delete", dangling.len());
        }
        queue.replace(listed, dangling);

        let version = version.unwrap_or_else(|| "0".to_string());
        let mut stream = match source.watch(&selector, &version).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!("Failed to watch {kind}s: {error}");
                if pause(&stop, &mut backoff).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let resync = resync_timer(resync_period);
        tokio::pin!(resync);

        loop {
            tokio::select! {
                () = stop.cancelled() => return,
                () = &mut resync => {
                    debug!("Resync period elapsed for {kind}s");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(WatchEvent::Added(object))) => {
                        push_delta(&queue, &kind, DeltaKind::Added, object);
                    }
                    Some(Ok(WatchEvent::Modified(object))) => {
                        push_delta(&queue, &kind, DeltaKind::Updated, object);
                    }
                    Some(Ok(WatchEvent::Deleted(object))) => {
                        push_delta(&queue, &kind, DeltaKind::Deleted, object);
                    }
                    Some(Ok(WatchEvent::Bookmark(_))) => {}
                    Some(Ok(WatchEvent::Error(error))) => {
                        debug!("Watch error for {kind}s: {error:?}");
                        break;
                    }
                    Some(Err(error)) => {
                        debug!("Watch stream failure for {kind}s: {error}");
                        break;
                    }
                    None => {
                        debug!("Watch stream for {kind}s ended");
                        break;
                    }
                },
            }
        }
    }
}

fn push_delta(queue: &DeltaQueue, kind: &str, delta: DeltaKind, object: kube::core::DynamicObject) {
    let reference = ResourceRef::from_object(kind, &object);
    queue.push(Delta { kind: delta, reference, object: Some(object) });
}

/// Sleep out the current backoff, doubling it for next time. Errs when shutdown interrupts.
async fn pause(stop: &CancellationToken, backoff: &mut Duration) -> std::result::Result<(), ()> {
    tokio::select! {
        () = stop.cancelled() => return Err(()),
        () = tokio::time::sleep(*backoff) => {}
    }
    *backoff = (*backoff * 2).min(MAX_BACKOFF);

    Ok(())
}

/// Timer that fires once after the resync period, or never when the period is zero.
async fn resync_timer(period: Duration) {
    if period.is_zero() {
        futures::future::pending::<()>().await;
    } else {
        tokio::time::sleep(period).await;
    }
}

/// Pop coalesced deltas, sanitize, and publish resources to the saver.
async fn drain(
    kind: String,
    queue: Arc<DeltaQueue>,
    sanitizer: Arc<dyn Sanitize>,
    resources: mpsc::Sender<Resource>,
    stop: CancellationToken,
) {
    let limiter = RateLimiter::new(1.0, 10.0);
    let mut attempts: HashMap<String, u32> = HashMap::new();

    loop {
        let (key, deltas) = tokio::select! {
            () = stop.cancelled() => return,
            popped = queue.pop() => popped,
        };

        match handle(&deltas, sanitizer.as_ref(), &resources).await {
            Ok(()) => {
                attempts.remove(&key);
            }
            Err(error) => {
                let count = attempts.entry(key.clone()).or_insert(0);
                *count += 1;
                if *count < MAX_ATTEMPTS {
                    warn!("Failed to handle {key} for {kind}s (attempt {count}): {error}");
                    tokio::select! {
                        () = stop.cancelled() => return,
                        () = limiter.acquire() => {}
                    }
                    queue.requeue(key, deltas);
                } else {
                    error!("Giving up on {key} for {kind}s after {count} attempts: {error}");
                    attempts.remove(&key);
                }
            }
        }
    }
}

/// Convert one item's deltas into resources and send them downstream, in order.
async fn handle(
    deltas: &[Delta],
    sanitizer: &dyn Sanitize,
    resources: &mpsc::Sender<Resource>,
) -> Result<()> {
    for delta in deltas {
        let resource = match &delta.object {
            Some(object) => {
                let mut object = object.clone();
                match sanitizer.sanitize(&mut object) {
                    Ok(()) => {}
                    Err(SanitizeError::Omit) => {
                        debug!("Ignoring {}", delta.reference);
                        continue;
                    }
                    Err(SanitizeError::Failed(reason)) => {
                        return Err(Error::Sanitize {
                            reference: delta.reference.to_string(),
                            reason,
                        });
                    }
                }

                Resource {
                    reference: delta.reference.clone(),
                    payload: Some(object),
                    exists: delta.kind != DeltaKind::Deleted,
                    status: status_of(delta.kind),
                }
            }
            // Deleted final state unknown: only the stored reference survives.
            None => Resource {
                reference: delta.reference.clone(),
                payload: None,
                exists: false,
                status: ResourceStatus::Deleted,
            },
        };

        debug!("Processing {resource}");
        if resources.send(resource).await.is_err() {
            // Receiver is gone; the invocation is shutting down.
            return Ok(());
        }
    }

    Ok(())
}

fn status_of(kind: DeltaKind) -> ResourceStatus {
    match kind {
        DeltaKind::Added => ResourceStatus::Added,
        DeltaKind::Updated => ResourceStatus::Updated,
        DeltaKind::Sync => ResourceStatus::Sync,
        DeltaKind::Deleted => ResourceStatus::Deleted,
    }
}

/// Token-bucket rate limiter gating retries.
pub(crate) struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    updated: Instant,
}

impl RateLimiter {
    /// Construct a bucket refilled at `rate` tokens per second, holding at most `burst`.
    pub(crate) fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState { tokens: burst, updated: Instant::now() }),
        }
    }

    /// Take one token, sleeping until the bucket refills when empty.
    pub(crate) async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(state.updated).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.updated = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
                }
            };

            match wait {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}
