mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use capnotify::{
    BroadcastStatus, ConnectionId, DeliveryError, Frame, ModelChange, ModelUpdateEvent,
    NotificationEngine, Notice, NoticeKind, NotifyError, Observe, SubscribeRequest, SubscriptionId,
    SubscriptionOptions, SubscriptionType,
};
use tokio::time::sleep;

use common::{engine_with, model, quick_config, settle, subscribe, Recorder};

#[tokio::test(start_paused = true)]
async fn subscribe_frame_creates_a_subscription_on_the_receiving_connection() {
    let (engine, conn) = engine_with(quick_config());
    let conn_id = ConnectionId::new("conn-1");

    let raw = r#"{
        "frame": "subscribe",
        "type": "model_update",
        "filters": [{"field": "provider_name", "operator": "equals", "value": "openai"}],
        "options": {"batch_size": 1, "max_retries": 0}
    }"#;
    let reply = engine.handle_message("client-1", &conn_id, raw).unwrap();
    let Frame::Subscribed { subscription_id } = reply else {
        panic!("unexpected reply: {reply:?}");
    };

    let info = engine.get_subscription(subscription_id).unwrap();
    assert_eq!(info.target, conn_id);
    assert_eq!(info.max_retries, 0);
    assert_eq!(info.filters.len(), 1);

    engine.publish(model("gpt-4o")).unwrap();
    engine
        .publish(ModelUpdateEvent::new("claude", "anthropic", ModelChange::Added))
        .unwrap();
    settle().await;
    assert_eq!(conn.subjects(), vec!["gpt-4o"]);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_frame_only_removes_the_clients_own_subscription() {
    let (engine, _conn) = engine_with(quick_config());
    let conn_id = ConnectionId::new("conn-1");
    let id = subscribe(&engine, SubscriptionType::AllUpdates, Default::default());

    let reply = engine
        .handle_frame("intruder", &conn_id, Frame::Unsubscribe { subscription_id: id })
        .unwrap();
    assert_eq!(
        reply,
        Some(Frame::Unsubscribed {
            subscription_id: id,
            removed: false
        })
    );
    assert!(engine.get_subscription(id).is_some());

    let reply = engine
        .handle_frame("client-1", &conn_id, Frame::Unsubscribe { subscription_id: id })
        .unwrap();
    assert_eq!(
        reply,
        Some(Frame::Unsubscribed {
            subscription_id: id,
            removed: true
        })
    );
}

#[tokio::test(start_paused = true)]
async fn ping_is_answered_and_keeps_the_connection_alive() {
    let (engine, _conn) = engine_with(quick_config());
    let conn_id = ConnectionId::new("conn-1");

    let reply = engine.handle_message("client-1", &conn_id, r#"{"frame":"ping","nonce":7}"#);
    assert_eq!(reply, Some(Frame::Pong { nonce: Some(7) }));

    let reply = engine.handle_message("client-1", &conn_id, r#"{"frame":"pong"}"#);
    assert_eq!(reply, None);

    let reply = engine.handle_message("client-1", &conn_id, r#"{"frame":"authenticate","token":"t"}"#);
    assert_eq!(reply, None);
}

#[tokio::test(start_paused = true)]
async fn malformed_and_outbound_frames_become_error_replies() {
    let (engine, _conn) = engine_with(quick_config());
    let conn_id = ConnectionId::new("conn-1");

    for raw in [
        "not json",
        r#"{"frame":"teleport"}"#,
        r#"{"frame":"subscribed","subscription_id":"6f1c1f4e-8f6e-4c71-9d3a-2f4b8d6f0a11"}"#,
        r#"{"frame":"subscribe","type":"model_update","filters":[{"field":"colour","operator":"equals","value":"red"}]}"#,
    ] {
        match engine.handle_message("client-1", &conn_id, raw) {
            Some(Frame::Error { code, .. }) => assert_eq!(code, "validation_error", "{raw}"),
            other => panic!("expected an error frame for {raw}, got {other:?}"),
        }
    }
    assert!(engine.get_subscriptions_by_client("client-1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn broadcast_to_client_prunes_failed_connections_on_partial_failure() {
    let (engine, healthy) = engine_with(quick_config());
    let broken = Recorder::new();
    broken.fail_always(DeliveryError::permanent("closed by peer"));
    engine
        .register_connection("client-1", "conn-2", broken.clone())
        .unwrap();

    let report = engine
        .broadcast_to_client("client-1", model("announcement"))
        .await
        .unwrap();
    assert_eq!(report.status(), BroadcastStatus::Partial);
    assert_eq!(report.pruned, vec![ConnectionId::new("conn-2")]);
    assert_eq!(healthy.subjects(), vec!["announcement"]);
    assert!(!engine.unregister_connection(&ConnectionId::new("conn-2")));
    assert_eq!(engine.get_metrics().pruned_connections, 1);

    // All failing: nothing is pruned.
    healthy.fail_always(DeliveryError::transient("busy"));
    let report = engine
        .broadcast_to_client("client-1", model("second"))
        .await
        .unwrap();
    assert_eq!(report.status(), BroadcastStatus::Failed);
    assert!(report.pruned.is_empty());
    assert_eq!(engine.get_metrics().connections, 1);
}

#[tokio::test(start_paused = true)]
async fn broadcast_reaches_connections_directly() {
    let (engine, first) = engine_with(quick_config());
    let second = Recorder::new();
    engine
        .register_connection("client-2", "conn-2", second.clone())
        .unwrap();

    let results = engine.broadcast(model("everyone"), None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_success()));

    let id = engine
        .subscribe(SubscribeRequest::new("client-2", SubscriptionType::AllUpdates).to("conn-2"))
        .unwrap()
        .0;
    let results = engine.broadcast(model("targeted"), Some(&[id][..])).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(first.subjects(), vec!["everyone"]);
    assert_eq!(second.subjects(), vec!["everyone", "targeted"]);

    let unknown = engine.broadcast(model("nobody"), Some(&[SubscriptionId::new()][..])).await;
    assert!(matches!(unknown, Err(NotifyError::NotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_prunes_silent_connections() {
    let mut cfg = quick_config();
    cfg.heartbeat_interval = Duration::from_secs(30);
    let (engine, conn) = engine_with(cfg);
    conn.fail_pings();

    sleep(Duration::from_secs(31)).await;
    assert!(!engine.touch_connection(&ConnectionId::new("conn-1")));
    let metrics = engine.get_metrics();
    assert_eq!(metrics.pruned_connections, 1);
    assert_eq!(metrics.connections, 0);
}

#[tokio::test(start_paused = true)]
async fn health_reports_open_breakers() {
    let mut cfg = quick_config();
    cfg.failure_threshold = 1;
    let (engine, conn) = engine_with(cfg);
    assert!(engine.health_check().is_healthy());

    subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(0),
            ..Default::default()
        },
    );
    conn.fail_always(DeliveryError::transient("down"));
    engine.publish(model("trip")).unwrap();
    settle().await;

    let report = engine.health_check();
    assert!(!report.is_healthy());
    assert!(!report.issues.is_empty());
}

#[derive(Default)]
struct Collector {
    kinds: Mutex<Vec<NoticeKind>>,
}

#[async_trait]
impl Observe for Collector {
    async fn on_notice(&self, notice: &Notice) {
        self.kinds.lock().push(notice.kind);
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

#[tokio::test(start_paused = true)]
async fn observers_see_notices_and_are_drained_on_shutdown() {
    let collector = Arc::new(Collector::default());
    let engine = NotificationEngine::builder(quick_config())
        .with_observers(vec![collector.clone() as Arc<dyn Observe>])
        .build()
        .unwrap();
    engine
        .register_connection("client-1", "conn-1", Recorder::new())
        .unwrap();
    subscribe(&engine, SubscriptionType::ModelUpdate, Default::default());
    engine.publish(model("observed")).unwrap();
    settle().await;

    let report = engine.shutdown().await;
    assert!(report.is_graceful());

    let kinds = collector.kinds.lock().clone();
    assert!(kinds.contains(&NoticeKind::SubscriptionCreated));
    assert!(kinds.contains(&NoticeKind::BatchDelivered));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_engine() {
    let (engine, _conn) = engine_with(quick_config());
    subscribe(&engine, SubscriptionType::ModelUpdate, Default::default());

    let report = engine.shutdown().await;
    assert!(report.is_graceful());
    assert!(report.joined >= 1);
    assert!(engine.is_closed());

    assert_eq!(engine.publish(model("late")), Err(NotifyError::Closed));
    assert!(matches!(
        engine.subscribe(SubscribeRequest::new("client-1", SubscriptionType::ModelUpdate).to("conn-1")),
        Err(NotifyError::Closed)
    ));
    assert_eq!(engine.shutdown().await, Default::default());
}
