//! End-to-end scenarios exercising `FilterSupervisor` + `FilterWorker`
//! together, the way a real ingress path and subscription-management API
//! would drive them.

use std::sync::Arc;
use std::time::Duration;

use fc_common::SubscriberId;
use fc_filter::endpoint::{channel_endpoint, Event};
use fc_filter::supervisor::FilterSupervisor;
use fc_filter::worker::WorkerMessage;
use fc_filter::Subscription;
use fc_filter_config::{ConfigSource, FieldValue};

fn supervisor(config: &str) -> FilterSupervisor {
    FilterSupervisor::new(
        "node-1",
        ConfigSource::inline(config),
        Duration::from_secs(30),
        Duration::from_secs(1),
        64,
    )
    .unwrap()
}

async fn push(sup: &FilterSupervisor, event_type: &str, payload: serde_json::Value) {
    let mailbox = sup.registry().get_mailbox(event_type).expect("worker must exist");
    mailbox
        .send(WorkerMessage::Deliver(Arc::new(Event::new(event_type, payload))))
        .await
        .unwrap();
}

async fn drain(rx: &mut tokio::sync::mpsc::Receiver<Arc<Event>>) -> Option<Arc<Event>> {
    tokio::time::timeout(Duration::from_millis(150), rx.recv()).await.ok().flatten()
}

// Scenario 1 (§8): region-matched subscription delivers on match, not on mismatch.
#[tokio::test]
async fn region_filter_delivers_only_on_match() {
    let sup = supervisor(
        r#"{"order.created": {"region": {"kind": "json_path", "path": "region", "type": "string"}}}"#,
    );
    let (endpoint, mut rx, _ctl) = channel_endpoint(SubscriberId::new("s1"), 4);

    let handles = sup
        .refresh_subscriptions(
            SubscriberId::new("s1"),
            endpoint,
            vec![Subscription::new(
                SubscriberId::new("s1"),
                "order.created",
                vec![("region".to_string(), FieldValue::Str("EU".to_string()))],
            )],
            vec![],
        )
        .await;
    for h in handles {
        h.done.await.unwrap();
    }

    push(&sup, "order.created", serde_json::json!({"region": "EU", "id": 1})).await;
    assert!(drain(&mut rx).await.is_some());

    push(&sup, "order.created", serde_json::json!({"region": "US", "id": 2})).await;
    assert!(drain(&mut rx).await.is_none());
}

// Scenario 2 (§8): shrinking the subscribed-type set clears the dropped type
// without disturbing the retained one.
#[tokio::test]
async fn refresh_clears_dropped_type_only() {
    let sup = supervisor(
        r#"{"order.created": {}, "order.paid": {"customer": {"kind": "json_path", "path": "customer", "type": "string"}}}"#,
    );
    let (endpoint, mut created_rx, _ctl) = channel_endpoint(SubscriberId::new("s1"), 4);
    let (paid_endpoint, mut paid_rx, _ctl2) = channel_endpoint(SubscriberId::new("s1"), 4);

    let prev = vec![
        Subscription::new(SubscriberId::new("s1"), "order.created", vec![]),
        Subscription::new(
            SubscriberId::new("s1"),
            "order.paid",
            vec![("customer".to_string(), FieldValue::Str("c1".to_string()))],
        ),
    ];

    // first refresh subscribes s1 to both types, each with its own endpoint
    for h in sup
        .refresh_subscriptions(SubscriberId::new("s1"), endpoint, vec![prev[0].clone()], vec![])
        .await
    {
        h.done.await.unwrap();
    }
    for h in sup
        .refresh_subscriptions(SubscriberId::new("s1"), paid_endpoint, vec![prev[1].clone()], vec![])
        .await
    {
        h.done.await.unwrap();
    }

    // second refresh: only order.paid remains in new_subs; prev_subs names both
    let dummy = channel_endpoint(SubscriberId::new("s1"), 4).0;
    for h in sup
        .refresh_subscriptions(SubscriberId::new("s1"), dummy, vec![prev[1].clone()], prev.clone())
        .await
    {
        h.done.await.unwrap();
    }

    push(&sup, "order.created", serde_json::json!({})).await;
    assert!(drain(&mut created_rx).await.is_none(), "order.created must be cleared for s1");

    push(&sup, "order.paid", serde_json::json!({"customer": "c1"})).await;
    assert!(paid_rx.recv().await.is_some(), "order.paid subscription must be untouched");
}

// Scenario 3 (§8): reload removing then restoring a field.
#[tokio::test]
async fn reload_toggles_field_liveness_without_resubscribing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extractors.json");
    let with_region = r#"{"order.created": {"region": {"kind": "json_path", "path": "region", "type": "string"}}}"#;
    std::fs::write(&path, with_region).unwrap();

    let sup = FilterSupervisor::new(
        "node-1",
        ConfigSource::path(path.clone()),
        Duration::from_secs(30),
        Duration::from_secs(1),
        64,
    )
    .unwrap();

    let (endpoint, mut rx, _ctl) = channel_endpoint(SubscriberId::new("s1"), 4);
    for h in sup
        .refresh_subscriptions(
            SubscriberId::new("s1"),
            endpoint,
            vec![Subscription::new(
                SubscriberId::new("s1"),
                "order.created",
                vec![("region".to_string(), FieldValue::Str("EU".to_string()))],
            )],
            vec![],
        )
        .await
    {
        h.done.await.unwrap();
    }

    std::fs::write(&path, r#"{"order.created": {}}"#).unwrap();
    sup.reload_config().await.unwrap();
    push(&sup, "order.created", serde_json::json!({"region": "EU"})).await;
    assert!(drain(&mut rx).await.is_none(), "field removal must make the subscription inert");

    std::fs::write(&path, with_region).unwrap();
    sup.reload_config().await.unwrap();
    push(&sup, "order.created", serde_json::json!({"region": "EU"})).await;
    assert!(drain(&mut rx).await.is_some(), "subscription must re-activate without re-subscribing");
}

// Scenario 4 (§8): exactly one of many distinct-value subscribers receives
// a matching event, and receives it exactly once.
#[tokio::test]
async fn exactly_one_of_many_subscribers_matches() {
    let sup = supervisor(r#"{"t": {"f": {"kind": "json_path", "path": "f", "type": "string"}}}"#);

    const N: usize = 200;
    let mut receivers = Vec::with_capacity(N);
    for i in 0..N {
        let id = SubscriberId::new(format!("sub-{i}"));
        let (endpoint, rx, _ctl) = channel_endpoint(id.clone(), 4);
        for h in sup
            .refresh_subscriptions(
                id.clone(),
                endpoint,
                vec![Subscription::new(
                    id,
                    "t",
                    vec![("f".to_string(), FieldValue::Str(format!("v_{i}")))],
                )],
                vec![],
            )
            .await
        {
            h.done.await.unwrap();
        }
        receivers.push(rx);
    }

    push(&sup, "t", serde_json::json!({"f": "v_42"})).await;

    let mut delivered = 0;
    for (i, rx) in receivers.iter_mut().enumerate() {
        if drain(rx).await.is_some() {
            delivered += 1;
            assert_eq!(i, 42, "only subscriber 42 should have received the event");
        }
    }
    assert_eq!(delivered, 1);
}

// Scenario 5 (§8): killing a subscriber's endpoint purges it; later
// matching events produce no delivery and no error.
#[tokio::test]
async fn dead_endpoint_is_purged_and_silently_skipped() {
    let sup = supervisor(r#"{"t": {}}"#);
    let (e1, mut rx1, _c1) = channel_endpoint(SubscriberId::new("s1"), 4);
    let (e2, mut rx2, c2) = channel_endpoint(SubscriberId::new("s2"), 4);

    for (id, endpoint) in [(SubscriberId::new("s1"), e1), (SubscriberId::new("s2"), e2)] {
        for h in sup
            .refresh_subscriptions(id.clone(), endpoint, vec![Subscription::new(id, "t", vec![])], vec![])
            .await
        {
            h.done.await.unwrap();
        }
    }

    c2.kill();
    tokio::time::sleep(Duration::from_millis(50)).await;

    push(&sup, "t", serde_json::json!({})).await;
    assert!(rx1.recv().await.is_some());
    assert!(drain(&mut rx2).await.is_none());
}

// Scenario 6 (§8): a malformed reload fails and leaves prior subscriptions
// delivering as before.
#[tokio::test]
async fn malformed_reload_preserves_prior_deliveries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extractors.json");
    std::fs::write(&path, r#"{"t": {}}"#).unwrap();

    let sup = FilterSupervisor::new(
        "node-1",
        ConfigSource::path(path.clone()),
        Duration::from_secs(30),
        Duration::from_secs(1),
        64,
    )
    .unwrap();

    let (endpoint, mut rx, _ctl) = channel_endpoint(SubscriberId::new("s1"), 4);
    for h in sup
        .refresh_subscriptions(
            SubscriberId::new("s1"),
            endpoint,
            vec![Subscription::new(SubscriberId::new("s1"), "t", vec![])],
            vec![],
        )
        .await
    {
        h.done.await.unwrap();
    }

    std::fs::write(&path, "{not valid json").unwrap();
    assert!(sup.reload_config().await.is_err());

    push(&sup, "t", serde_json::json!({})).await;
    assert!(rx.recv().await.is_some(), "prior subscriptions must still deliver after a failed reload");
}
