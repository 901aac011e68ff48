//! Filter Supervisor (§4.D): per-node singleton that finds or starts
//! Filter Workers, brokers subscription refreshes, and reloads the
//! extractor configuration.

use std::sync::Arc;
use std::time::Duration;

use fc_common::SubscriberId;
use fc_filter_config::{ConfigSource, ExtractorMap};
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::endpoint::SubscriberEndpoint;
use crate::error::{FilterError, Result};
use crate::registry::{WorkerHandle, WorkerRegistry};
use crate::subscription::{group_by_event_type, Subscription};
use crate::worker::{FilterWorker, RefreshOutcome, WorkerMessage};

/// Stand-in for a cluster-wide Supervisor process group (§9 Design
/// Notes: "leave as a pluggable interface"). This crate ships only the
/// single-node implementation; a multi-node one would replace
/// `processes()`'s body with a real discovery lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorHandle(pub String);

/// A pending refresh acknowledgement for one event type, handed back to
/// callers that need a rendezvous (§4.D: "the Supervisor does not wait
/// for `done` itself").
pub struct RefreshHandle {
    pub event_type: String,
    pub done: oneshot::Receiver<RefreshOutcome>,
}

pub struct FilterSupervisor {
    node_id: String,
    registry: WorkerRegistry,
    extractor_map: RwLock<ExtractorMap>,
    config_source: ConfigSource,
    idle_ttl: Duration,
    reload_timeout: Duration,
    mailbox_buffer: usize,
}

impl FilterSupervisor {
    pub fn new(
        node_id: impl Into<String>,
        config_source: ConfigSource,
        idle_ttl: Duration,
        reload_timeout: Duration,
        mailbox_buffer: usize,
    ) -> Result<Self> {
        let initial = fc_filter_config::load(&config_source)?;
        Ok(Self {
            node_id: node_id.into(),
            registry: WorkerRegistry::new(),
            extractor_map: RwLock::new(initial),
            config_source,
            idle_ttl,
            reload_timeout,
            mailbox_buffer,
        })
    }

    /// Looks up a live worker for `event_type`, starting one with the
    /// current `field_map` if none exists or the registered one has
    /// already terminated.
    fn find_or_start_worker(&self, event_type: &str) -> tokio::sync::mpsc::Sender<WorkerMessage> {
        self.registry.reap_finished();
        if let Some(mailbox) = self.registry.get_mailbox(event_type) {
            return mailbox;
        }

        let field_map = fc_filter_config::for_event_type(&self.extractor_map.read(), event_type);
        let (mailbox, task) = FilterWorker::spawn(
            event_type.to_string(),
            field_map,
            self.idle_ttl,
            self.mailbox_buffer,
        );
        info!(event_type = %event_type, "started filter worker");
        self.registry.insert(event_type.to_string(), WorkerHandle { mailbox: mailbox.clone(), task });
        mailbox
    }

    /// §4.D: groups `new_subs` by event type, finds-or-starts a worker
    /// per type, and forwards each group. For every type present in
    /// `prev_subs` but absent from the new grouping, clears `subscriber`
    /// on that type's worker if one exists; does not start one just to
    /// clear it.
    pub async fn refresh_subscriptions(
        &self,
        subscriber: SubscriberId,
        endpoint: Arc<dyn SubscriberEndpoint>,
        new_subs: Vec<Subscription>,
        prev_subs: Vec<Subscription>,
    ) -> Vec<RefreshHandle> {
        let new_by_type = group_by_event_type(new_subs);
        let prev_types: std::collections::HashSet<String> =
            prev_subs.into_iter().map(|s| s.event_type).collect();

        let mut handles = Vec::with_capacity(new_by_type.len());

        for (event_type, subs) in new_by_type {
            let mailbox = self.find_or_start_worker(&event_type);
            let (ack, done) = oneshot::channel();
            if mailbox
                .send(WorkerMessage::RefreshSubscriptions {
                    subscriber: subscriber.clone(),
                    subs,
                    endpoint: Some(endpoint.clone()),
                    ack,
                })
                .await
                .is_err()
            {
                warn!(event_type = %event_type, "worker mailbox closed before refresh could be delivered");
                continue;
            }
            handles.push(RefreshHandle { event_type, done });
        }

        for event_type in prev_types {
            if new_by_type_contains(&handles, &event_type) {
                continue;
            }
            let Some(mailbox) = self.registry.get_mailbox(&event_type) else {
                continue; // no worker for this type: no-op, per §4.D
            };
            let (ack, done) = oneshot::channel();
            if mailbox
                .send(WorkerMessage::RefreshSubscriptions {
                    subscriber: subscriber.clone(),
                    subs: Vec::new(),
                    endpoint: None,
                    ack,
                })
                .await
                .is_err()
            {
                warn!(event_type = %event_type, "worker mailbox closed before clear could be delivered");
                continue;
            }
            handles.push(RefreshHandle { event_type, done });
        }

        handles
    }

    /// §4.D / §7: atomic reload. Validates and forwards the new field
    /// map for every type currently or newly known; on any worker
    /// timeout or send failure the prior `ExtractorMap` is left in place
    /// and an error is returned.
    pub async fn reload_config(&self) -> Result<()> {
        let next = fc_filter_config::load(&self.config_source)?;

        let prev_types: Vec<String> = self.extractor_map.read().keys().cloned().collect();
        let mut union_types: std::collections::HashSet<String> = prev_types.into_iter().collect();
        union_types.extend(next.keys().cloned());

        self.registry.reap_finished();

        for event_type in &union_types {
            let field_map = fc_filter_config::for_event_type(&next, event_type);
            fc_filter_config::check_filter_config(&field_map)?;

            let Some(mailbox) = self.registry.get_mailbox(event_type) else {
                continue; // no live worker for this type: nothing to push to
            };

            let (ack, done) = oneshot::channel();
            if mailbox
                .send(WorkerMessage::ReloadFields { field_map, ack })
                .await
                .is_err()
            {
                error!(event_type = %event_type, "worker mailbox closed during reload, aborting");
                return Err(FilterError::WorkerDown(event_type.clone()));
            }

            if tokio::time::timeout(self.reload_timeout, done).await.is_err() {
                error!(event_type = %event_type, "reload timed out waiting on worker, aborting");
                return Err(FilterError::ReloadTimeout(event_type.clone()));
            }
        }

        *self.extractor_map.write() = next;
        Ok(())
    }

    /// §4.D: cluster membership. The shipped implementation is
    /// single-node and returns only this supervisor's own handle.
    pub fn processes(&self) -> Vec<SupervisorHandle> {
        vec![SupervisorHandle(self.node_id.clone())]
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn current_field_map(&self, event_type: &str) -> fc_filter_config::FieldMap {
        fc_filter_config::for_event_type(&self.extractor_map.read(), event_type)
    }
}

fn new_by_type_contains(handles: &[RefreshHandle], event_type: &str) -> bool {
    handles.iter().any(|h| h.event_type == event_type)
}
