//! Subscriber endpoint contract (§6) and a channel-backed implementation
//! used by the dev binary and the test suite. The "liveness subsystem"
//! itself (presence, socket auth) is an external collaborator; this crate
//! only needs the addressable-and-watchable interface it exposes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fc_common::SubscriberId;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

/// An inbound event of a given type, ready for matching and delivery.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Outcome of a single delivery attempt (§4.C.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Dead,
    Full,
}

/// Stable reference token naming the subscriber whose endpoint just
/// terminated, returned by `watch_liveness` per §6.
#[derive(Debug, Clone)]
pub struct LivenessToken(pub SubscriberId);

/// Addressable, liveness-observable destination for delivered events.
#[async_trait]
pub trait SubscriberEndpoint: Send + Sync {
    fn id(&self) -> &SubscriberId;

    /// Best-effort, non-blocking delivery (§4.C.4): never retried by the
    /// caller, never allowed to block other subscribers' deliveries.
    async fn deliver(&self, event: Arc<Event>) -> DeliveryOutcome;

    /// Resolves once, when this endpoint terminates. Callers subscribe
    /// freely; the underlying broadcast fans a single termination event
    /// out to every watcher.
    async fn watch_liveness(&self) -> LivenessToken;
}

/// Reference `SubscriberEndpoint` backed by a bounded `mpsc` channel.
/// Good enough to exercise the full filter pipeline without a real
/// transport: the dev binary and tests hold the paired `Receiver` and
/// `EndpointController`.
pub struct ChannelEndpoint {
    id: SubscriberId,
    tx: mpsc::Sender<Arc<Event>>,
    alive: Arc<AtomicBool>,
    terminated_tx: broadcast::Sender<()>,
}

/// Test/ingress-side handle to simulate a subscriber disconnecting.
#[derive(Clone)]
pub struct EndpointController {
    alive: Arc<AtomicBool>,
    terminated_tx: broadcast::Sender<()>,
}

impl EndpointController {
    pub fn kill(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return; // already dead
        }
        let _ = self.terminated_tx.send(());
    }
}

/// Creates a `ChannelEndpoint` plus the receiver side and a controller to
/// kill it. Useful outside `#[cfg(test)]` too — the dev binary needs a
/// concrete endpoint.
pub fn channel_endpoint(
    id: SubscriberId,
    buffer: usize,
) -> (Arc<ChannelEndpoint>, mpsc::Receiver<Arc<Event>>, EndpointController) {
    let (tx, rx) = mpsc::channel(buffer);
    let (terminated_tx, _) = broadcast::channel(1);
    let alive = Arc::new(AtomicBool::new(true));

    let endpoint = Arc::new(ChannelEndpoint {
        id,
        tx,
        alive: alive.clone(),
        terminated_tx: terminated_tx.clone(),
    });
    let controller = EndpointController { alive, terminated_tx };

    (endpoint, rx, controller)
}

#[async_trait]
impl SubscriberEndpoint for ChannelEndpoint {
    fn id(&self) -> &SubscriberId {
        &self.id
    }

    async fn deliver(&self, event: Arc<Event>) -> DeliveryOutcome {
        if !self.alive.load(Ordering::SeqCst) {
            return DeliveryOutcome::Dead;
        }
        match self.tx.try_send(event) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => DeliveryOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::Dead,
        }
    }

    async fn watch_liveness(&self) -> LivenessToken {
        if !self.alive.load(Ordering::SeqCst) {
            return LivenessToken(self.id.clone());
        }
        let mut rx = self.terminated_tx.subscribe();
        let _ = rx.recv().await;
        LivenessToken(self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_while_alive() {
        let (endpoint, mut rx, _ctl) = channel_endpoint(SubscriberId::new("s1"), 4);
        let event = Arc::new(Event::new("t", serde_json::json!({})));
        let outcome = endpoint.deliver(event).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn reports_dead_after_kill() {
        let (endpoint, _rx, ctl) = channel_endpoint(SubscriberId::new("s1"), 4);
        ctl.kill();
        let event = Arc::new(Event::new("t", serde_json::json!({})));
        let outcome = endpoint.deliver(event).await;
        assert_eq!(outcome, DeliveryOutcome::Dead);
    }

    #[tokio::test]
    async fn reports_full_when_mailbox_saturated() {
        let (endpoint, _rx, _ctl) = channel_endpoint(SubscriberId::new("s1"), 1);
        let event = Arc::new(Event::new("t", serde_json::json!({})));
        assert_eq!(endpoint.deliver(event.clone()).await, DeliveryOutcome::Delivered);
        assert_eq!(endpoint.deliver(event).await, DeliveryOutcome::Full);
    }

    #[tokio::test]
    async fn watch_liveness_resolves_on_kill() {
        let (endpoint, _rx, ctl) = channel_endpoint(SubscriberId::new("s1"), 4);
        let watch = tokio::spawn(async move { endpoint.watch_liveness().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ctl.kill();
        let token = watch.await.unwrap();
        assert_eq!(token.0, SubscriberId::new("s1"));
    }
}
