//! Per-event-type filter worker (§4.C): owns the subscriptions and the
//! matching accelerator for exactly one event type, serialized through a
//! single mailbox so refreshes, reloads, and deliveries never race each
//! other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fc_common::SubscriberId;
use fc_filter_config::{FieldMap, FieldValue};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::endpoint::{DeliveryOutcome, Event, SubscriberEndpoint};
use crate::subscription::Subscription;

/// Messages a `FilterWorker` accepts on its mailbox. All replies travel
/// back over a `oneshot` so the supervisor can await a refresh or reload
/// without the worker ever calling back out on its own (§5: no cycles).
pub enum WorkerMessage {
    Deliver(Arc<Event>),
    /// Replaces the entire subscription set of `subscriber` on this
    /// worker with `subs`. An empty `subs` is the canonical clear; `endpoint`
    /// is only needed (and only read) when `subs` is non-empty.
    RefreshSubscriptions {
        subscriber: SubscriberId,
        subs: Vec<Subscription>,
        endpoint: Option<Arc<dyn SubscriberEndpoint>>,
        ack: oneshot::Sender<RefreshOutcome>,
    },
    ReloadFields {
        field_map: FieldMap,
        ack: oneshot::Sender<()>,
    },
    EndpointTerminated(SubscriberId),
    GetStats(oneshot::Sender<WorkerStats>),
}

/// Result of one `RefreshSubscriptions` call: how many of the offered
/// subscriptions were kept versus rejected for referencing a field
/// unknown to this worker's current `field_map` (§3 invariant).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub applied: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub event_type: String,
    pub subscriber_count: usize,
    pub subscription_count: usize,
    pub field_count: usize,
    pub delivery_drops: u64,
    pub extraction_errors: u64,
}

struct SubscriberState {
    subscriptions: Vec<Subscription>,
    endpoint: Arc<dyn SubscriberEndpoint>,
    watch: JoinHandle<()>,
}

/// Identifies one subscription for index/counting purposes: the
/// subscriber it belongs to plus its position in that subscriber's list.
type SubKey = (SubscriberId, usize);

/// Owns one event type's live subscriptions and the inverted index used
/// to match incoming events against them.
pub struct FilterWorker {
    event_type: String,
    field_map: FieldMap,
    by_subscriber: HashMap<SubscriberId, SubscriberState>,
    /// `(field_name, value) -> subscriptions whose constraints include it`.
    /// A `Vec`, not a `HashSet`: a subscription may repeat the same
    /// constraint, and counting must reflect that when deciding whether
    /// all of its constraints were satisfied.
    index: HashMap<(String, FieldValue), Vec<SubKey>>,
    /// Subscribers with at least one zero-constraint subscription — such
    /// a subscription matches every event of this type and has no key to
    /// live under in `index`.
    match_all: Vec<SubscriberId>,
    delivery_drops: AtomicU64,
    extraction_errors: AtomicU64,
    mailbox: mpsc::Receiver<WorkerMessage>,
    self_tx: mpsc::Sender<WorkerMessage>,
    idle_ttl: Duration,
}

impl FilterWorker {
    pub fn spawn(
        event_type: String,
        field_map: FieldMap,
        idle_ttl: Duration,
        buffer: usize,
    ) -> (mpsc::Sender<WorkerMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer);
        let worker = FilterWorker {
            event_type,
            field_map,
            by_subscriber: HashMap::new(),
            index: HashMap::new(),
            match_all: Vec::new(),
            delivery_drops: AtomicU64::new(0),
            extraction_errors: AtomicU64::new(0),
            mailbox: rx,
            self_tx: tx.clone(),
            idle_ttl,
        };
        let task = tokio::spawn(worker.run());
        (tx, task)
    }

    async fn run(mut self) {
        loop {
            match tokio::time::timeout(self.idle_ttl, self.mailbox.recv()).await {
                Ok(Some(msg)) => self.handle(msg).await,
                Ok(None) => {
                    debug!(event_type = %self.event_type, "worker mailbox closed, shutting down");
                    break;
                }
                Err(_) => {
                    if self.by_subscriber.is_empty() {
                        info!(event_type = %self.event_type, "worker idle timeout, shutting down");
                        break;
                    }
                    continue;
                }
            }
        }
    }

    async fn handle(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Deliver(event) => self.deliver(event).await,
            WorkerMessage::RefreshSubscriptions {
                subscriber,
                subs,
                endpoint,
                ack,
            } => {
                let outcome = self.refresh(subscriber, subs, endpoint);
                let _ = ack.send(outcome);
            }
            WorkerMessage::ReloadFields { field_map, ack } => {
                self.field_map = field_map;
                self.rebuild_index();
                let _ = ack.send(());
            }
            WorkerMessage::EndpointTerminated(id) => self.remove_subscriber(&id),
            WorkerMessage::GetStats(ack) => {
                let subscription_count = self.by_subscriber.values().map(|s| s.subscriptions.len()).sum();
                let _ = ack.send(WorkerStats {
                    event_type: self.event_type.clone(),
                    subscriber_count: self.by_subscriber.len(),
                    subscription_count,
                    field_count: self.field_map.len(),
                    delivery_drops: self.delivery_drops.load(Ordering::Relaxed),
                    extraction_errors: self.extraction_errors.load(Ordering::Relaxed),
                });
            }
        }
    }

    /// Replace-not-merge (§9 open question, resolved): `subs` entirely
    /// replaces `subscriber`'s prior subscription set on this worker.
    /// `subs == []` clears the subscriber outright.
    fn refresh(
        &mut self,
        subscriber: SubscriberId,
        subs: Vec<Subscription>,
        endpoint: Option<Arc<dyn SubscriberEndpoint>>,
    ) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();

        if subs.is_empty() {
            self.remove_subscriber(&subscriber);
            return outcome;
        }

        let mut kept = Vec::with_capacity(subs.len());
        for sub in subs {
            if sub.fields_known(&self.field_map) {
                kept.push(sub);
                outcome.applied += 1;
            } else {
                outcome.rejected += 1;
            }
        }

        if kept.is_empty() {
            self.remove_subscriber(&subscriber);
            return outcome;
        }

        // an already-known subscriber keeps its prior watch and endpoint handle
        let (watch, endpoint) = match self.by_subscriber.remove(&subscriber) {
            Some(existing) => (existing.watch, endpoint.unwrap_or(existing.endpoint)),
            None => match endpoint {
                Some(endpoint) => {
                    let watch = self.spawn_watch(endpoint.clone());
                    (watch, endpoint)
                }
                None => {
                    warn!(
                        event_type = %self.event_type,
                        subscriber = %subscriber,
                        "refresh for unknown subscriber arrived with no endpoint, rejecting"
                    );
                    outcome.rejected += outcome.applied;
                    outcome.applied = 0;
                    return outcome;
                }
            },
        };

        self.by_subscriber.insert(
            subscriber,
            SubscriberState {
                subscriptions: kept,
                endpoint,
                watch,
            },
        );
        self.rebuild_index();
        outcome
    }

    fn spawn_watch(&self, endpoint: Arc<dyn SubscriberEndpoint>) -> JoinHandle<()> {
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let token = endpoint.watch_liveness().await;
            let _ = self_tx.send(WorkerMessage::EndpointTerminated(token.0)).await;
        })
    }

    fn remove_subscriber(&mut self, id: &SubscriberId) {
        if let Some(state) = self.by_subscriber.remove(id) {
            state.watch.abort();
            self.rebuild_index();
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        self.match_all.clear();
        for (id, state) in &self.by_subscriber {
            let mut matches_all = false;
            for (idx, sub) in state.subscriptions.iter().enumerate() {
                if sub.constraints.is_empty() {
                    matches_all = true;
                    continue;
                }
                for (field, value) in &sub.constraints {
                    self.index
                        .entry((field.clone(), value.clone()))
                        .or_default()
                        .push((id.clone(), idx));
                }
            }
            if matches_all {
                self.match_all.push(id.clone());
            }
        }
    }

    async fn deliver(&mut self, event: Arc<Event>) {
        // Only fields some live subscription actually constrains are worth
        // extracting; a field_map entry nobody references yet would just
        // inflate extraction_errors with false positives (§7).
        let live_fields: std::collections::HashSet<&str> =
            self.index.keys().map(|(field, _)| field.as_str()).collect();

        let mut counts: HashMap<SubKey, usize> = HashMap::new();
        for field_name in live_fields {
            let Some(spec) = self.field_map.get(field_name) else {
                continue;
            };
            let value = match fc_filter_config::extract(spec, &event.payload) {
                Ok(v) => v,
                Err(_) => {
                    self.extraction_errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            if let Some(subs) = self.index.get(&(field_name.to_string(), value)) {
                for key in subs {
                    *counts.entry(key.clone()).or_insert(0) += 1;
                }
            }
        }

        let mut matched: Vec<SubscriberId> = self.match_all.clone();
        for ((subscriber, idx), count) in counts {
            if let Some(state) = self.by_subscriber.get(&subscriber) {
                if let Some(sub) = state.subscriptions.get(idx) {
                    if count == sub.constraints.len() && !matched.contains(&subscriber) {
                        matched.push(subscriber);
                    }
                }
            }
        }

        let mut dead = Vec::new();
        for id in matched {
            let Some(state) = self.by_subscriber.get(&id) else {
                continue;
            };
            match state.endpoint.deliver(event.clone()).await {
                DeliveryOutcome::Delivered => {}
                DeliveryOutcome::Full => {
                    self.delivery_drops.fetch_add(1, Ordering::Relaxed);
                    warn!(event_type = %self.event_type, subscriber = %id, "subscriber mailbox full, dropping event");
                }
                DeliveryOutcome::Dead => {
                    self.delivery_drops.fetch_add(1, Ordering::Relaxed);
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.remove_subscriber(&id);
        }
    }
}
