mod common;

use std::time::Duration;

use capnotify::{
    CapabilityChange, CapabilityUpdateEvent, DeadLetterReason, DeliveryError, NotifyError,
    ReplayOutcome, Severity, SubscribeRequest, SubscriptionOptions, SubscriptionType,
};
use tokio::time::sleep;
use uuid::Uuid;

use common::{engine_with, model, quick_config, settle, subscribe};

#[tokio::test(start_paused = true)]
async fn flushes_when_batch_is_full() {
    let (engine, conn) = engine_with(quick_config());
    subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            batch_size: Some(3),
            ..Default::default()
        },
    );

    for id in ["m1", "m2", "m3", "m4"] {
        engine.publish(model(id)).unwrap();
    }
    settle().await;
    assert_eq!(conn.batches(), vec![vec!["m1", "m2", "m3"]]);

    // The remainder waits for the 5s batch window.
    sleep(Duration::from_secs(4)).await;
    assert_eq!(conn.batches().len(), 1);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(conn.batches()[1], vec!["m4"]);
}

#[tokio::test(start_paused = true)]
async fn higher_priority_lanes_flush_first() {
    let (engine, conn) = engine_with(quick_config());
    subscribe(
        &engine,
        SubscriptionType::AllUpdates,
        SubscriptionOptions {
            batch_size: Some(10),
            ..Default::default()
        },
    );

    engine
        .publish(CapabilityUpdateEvent::new("vision", CapabilityChange::Added))
        .unwrap();
    engine.publish(model("normal")).unwrap();
    engine
        .publish(model("urgent").with_severity(Severity::High))
        .unwrap();
    settle().await;
    assert!(conn.batches().is_empty());

    sleep(Duration::from_secs(6)).await;
    assert_eq!(
        conn.batches(),
        vec![vec!["urgent"], vec!["normal"], vec!["vision"]]
    );
}

#[tokio::test(start_paused = true)]
async fn critical_events_skip_the_batch_window() {
    let (engine, conn) = engine_with(quick_config());
    subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            batch_size: Some(10),
            ..Default::default()
        },
    );

    engine
        .publish(model("outage").with_severity(Severity::Critical))
        .unwrap();
    settle().await;
    assert_eq!(conn.subjects(), vec!["outage"]);
}

#[tokio::test(start_paused = true)]
async fn events_arrive_in_publish_order() {
    let (engine, conn) = engine_with(quick_config());
    subscribe(&engine, SubscriptionType::ModelUpdate, Default::default());

    let ids: Vec<String> = (0..20).map(|i| format!("model-{i}")).collect();
    for id in &ids {
        engine.publish(model(id)).unwrap();
    }
    sleep(Duration::from_secs(1)).await;
    assert_eq!(conn.subjects(), ids);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_then_dead_letter() {
    let (engine, conn) = engine_with(quick_config());
    let sub = subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(2),
            ..Default::default()
        },
    );
    conn.fail_always(DeliveryError::transient("connection reset"));

    let receipt = engine.publish(model("gpt-x")).unwrap();
    settle().await;
    assert_eq!(conn.sends(), 1);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(conn.sends(), 3);

    let dead = engine.get_dead_letter_queue(10, 0);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_id, receipt.event_id);
    assert_eq!(dead[0].subscription_id, sub);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].reason, DeadLetterReason::MaxRetriesExceeded);
    assert_eq!(dead[0].error, DeliveryError::transient("connection reset"));

    let stats = engine.get_subscription_stats(sub).unwrap();
    assert_eq!(stats.event_count, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.failed_attempts, 3);

    let metrics = engine.get_metrics();
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.dead_lettered, 1);
    assert_eq!(metrics.dead_letters, 1);
}

#[tokio::test(start_paused = true)]
async fn pausing_holds_a_batch_that_is_being_retried() {
    let (engine, conn) = engine_with(quick_config());
    let sub = subscribe(&engine, SubscriptionType::ModelUpdate, Default::default());
    conn.fail_always(DeliveryError::transient("connection reset"));

    engine.publish(model("held")).unwrap();
    settle().await;
    assert_eq!(conn.sends(), 1);

    // The backoff elapses while paused; no further attempt is made.
    engine.pause(sub).unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(conn.sends(), 1);
    assert!(engine.get_dead_letter_queue(10, 0).is_empty());

    conn.heal();
    engine.resume(sub).unwrap();
    settle().await;
    assert_eq!(conn.sends(), 2);
    assert_eq!(conn.subjects(), vec!["held"]);

    let stats = engine.get_subscription_stats(sub).unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.error_count, 0);
    assert!(engine.get_dead_letter_queue(10, 0).is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_during_backoff_drops_the_pending_retry() {
    let (engine, conn) = engine_with(quick_config());
    let sub = subscribe(&engine, SubscriptionType::ModelUpdate, Default::default());
    conn.fail_always(DeliveryError::transient("connection reset"));

    engine.publish(model("abandoned")).unwrap();
    settle().await;
    assert_eq!(conn.sends(), 1);

    assert!(engine.unsubscribe(sub));
    conn.heal();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(conn.sends(), 1);
    assert!(conn.subjects().is_empty());
    assert!(engine.get_dead_letter_queue(10, 0).is_empty());
    assert_eq!(engine.get_metrics().dead_lettered, 0);
}

#[tokio::test(start_paused = true)]
async fn a_retry_can_recover_the_batch() {
    let (engine, conn) = engine_with(quick_config());
    let sub = subscribe(&engine, SubscriptionType::ModelUpdate, Default::default());
    conn.fail_next(1, DeliveryError::Timeout {
        timeout: Duration::from_secs(1),
    });

    engine.publish(model("flaky")).unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(conn.sends(), 2);
    assert_eq!(conn.subjects(), vec!["flaky"]);
    assert!(engine.get_dead_letter_queue(10, 0).is_empty());
    let stats = engine.get_subscription_stats(sub).unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.error_count, 0);
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_are_not_retried() {
    let (engine, conn) = engine_with(quick_config());
    subscribe(&engine, SubscriptionType::ModelUpdate, Default::default());
    conn.fail_always(DeliveryError::Invalid {
        reason: "schema".into(),
    });

    engine.publish(model("bad")).unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(conn.sends(), 1);
    let dead = engine.get_dead_letter_queue(10, 0);
    assert_eq!(dead[0].reason, DeadLetterReason::NonRetryable);
    assert_eq!(dead[0].attempts, 1);
    assert_eq!(engine.get_metrics().retries, 0);
}

#[tokio::test(start_paused = true)]
async fn missing_target_connection_dead_letters_immediately() {
    let (engine, _conn) = engine_with(quick_config());
    engine
        .subscribe(SubscribeRequest::new("client-1", SubscriptionType::ModelUpdate).to("ghost"))
        .unwrap();

    engine.publish(model("lost")).unwrap();
    settle().await;

    let dead = engine.get_dead_letter_queue(10, 0);
    assert_eq!(dead.len(), 1);
    assert!(matches!(dead[0].error, DeliveryError::NotFound { .. }));
    assert_eq!(dead[0].reason, DeadLetterReason::NonRetryable);
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_fails_fast_and_recovers_through_a_probe() {
    let mut cfg = quick_config();
    cfg.failure_threshold = 2;
    cfg.circuit_breaker_timeout = Duration::from_secs(10);
    let (engine, conn) = engine_with(cfg);
    let sub = subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(0),
            ..Default::default()
        },
    );
    conn.fail_always(DeliveryError::transient("503"));

    engine.publish(model("a")).unwrap();
    settle().await;
    engine.publish(model("b")).unwrap();
    settle().await;
    assert_eq!(conn.sends(), 2);
    assert!(engine.get_subscription_stats(sub).unwrap().breaker_open);

    // Open: the connection is not touched.
    engine.publish(model("c")).unwrap();
    settle().await;
    assert_eq!(conn.sends(), 2);
    let newest = &engine.get_dead_letter_queue(1, 0)[0];
    assert!(matches!(newest.error, DeliveryError::CircuitOpen { .. }));

    let metrics = engine.get_metrics();
    assert_eq!(metrics.breaker_opens, 1);
    assert_eq!(metrics.circuit_open_rejections, 1);
    assert_eq!(metrics.dead_lettered, 3);

    conn.heal();
    sleep(Duration::from_secs(10)).await;
    engine.publish(model("d")).unwrap();
    settle().await;

    assert_eq!(conn.sends(), 3);
    assert_eq!(conn.subjects(), vec!["d"]);
    assert!(!engine.get_subscription_stats(sub).unwrap().breaker_open);
}

#[tokio::test(start_paused = true)]
async fn dead_letters_replay_without_touching_subscription_counters() {
    let (engine, conn) = engine_with(quick_config());
    let sub = subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(1),
            ..Default::default()
        },
    );
    conn.fail_always(DeliveryError::transient("down"));
    let receipt = engine.publish(model("replay-me")).unwrap();
    sleep(Duration::from_secs(1)).await;
    let record = engine.get_dead_letter_queue(1, 0).remove(0);
    assert_eq!(record.attempts, 2);
    let before = engine.get_subscription_stats(sub).unwrap();

    // Still failing: the record goes back with the same id.
    let outcome = engine.retry_dead_letter(record.id).await.unwrap();
    assert_eq!(outcome, ReplayOutcome::Failed(DeliveryError::transient("down")));
    let again = engine.get_dead_letter_queue(10, 0);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].id, record.id);
    assert_eq!(again[0].attempts, 3);
    assert_eq!(again[0].reason, DeadLetterReason::ReplayFailed);

    conn.heal();
    let outcome = engine.retry_dead_letter(record.id).await.unwrap();
    assert!(outcome.is_delivered());
    assert!(engine.get_dead_letter_queue(10, 0).is_empty());
    assert_eq!(conn.subjects(), vec!["replay-me"]);
    assert_eq!(engine.get_metrics().replayed, 1);

    let after = engine.get_subscription_stats(sub).unwrap();
    assert_eq!(after.delivered, before.delivered);
    assert_eq!(after.error_count, before.error_count);
    assert_eq!(receipt.event_id, record.event_id);
}

#[tokio::test(start_paused = true)]
async fn replay_of_unknown_records_or_removed_subscriptions_is_not_found() {
    let (engine, conn) = engine_with(quick_config());
    let sub = subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(0),
            ..Default::default()
        },
    );
    assert!(matches!(
        engine.retry_dead_letter(Uuid::new_v4()).await,
        Err(NotifyError::NotFound { .. })
    ));

    conn.fail_always(DeliveryError::transient("down"));
    engine.publish(model("orphan")).unwrap();
    settle().await;
    let record = engine.get_dead_letter_queue(1, 0).remove(0);
    assert!(engine.unsubscribe(sub));

    let other = subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(0),
            ..Default::default()
        },
    );
    engine.publish(model("newer")).unwrap();
    settle().await;

    assert!(matches!(
        engine.retry_dead_letter(record.id).await,
        Err(NotifyError::NotFound { .. })
    ));
    // The record is kept for inspection, in its original position.
    let queue = engine.get_dead_letter_queue(10, 0);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].subscription_id, other);
    assert_eq!(queue[1].id, record.id);
    assert_eq!(queue[1].attempts, record.attempts);
    assert_eq!(engine.get_metrics().dead_letter_evictions, 0);
}

#[tokio::test(start_paused = true)]
async fn bulk_replay_delivers_exhausted_records() {
    let (engine, conn) = engine_with(quick_config());
    subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(0),
            ..Default::default()
        },
    );
    conn.fail_always(DeliveryError::transient("down"));
    for id in ["r1", "r2"] {
        engine.publish(model(id)).unwrap();
    }
    settle().await;
    assert_eq!(engine.get_dead_letter_queue(10, 0).len(), 2);

    conn.heal();
    assert_eq!(engine.replay_dead_letters().await, 2);
    assert!(engine.get_dead_letter_queue(10, 0).is_empty());
    assert_eq!(conn.subjects(), vec!["r1", "r2"]);
}

#[tokio::test(start_paused = true)]
async fn automatic_replay_runs_on_its_interval() {
    let mut cfg = quick_config();
    cfg.auto_replay_interval = Some(Duration::from_secs(60));
    let (engine, conn) = engine_with(cfg);
    subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(0),
            ..Default::default()
        },
    );
    conn.fail_always(DeliveryError::transient("down"));
    engine.publish(model("later")).unwrap();
    settle().await;
    conn.heal();

    sleep(Duration::from_secs(61)).await;
    assert!(engine.get_dead_letter_queue(10, 0).is_empty());
    assert_eq!(conn.subjects(), vec!["later"]);
}

#[tokio::test(start_paused = true)]
async fn dead_letter_store_evicts_the_oldest_record() {
    let mut cfg = quick_config();
    cfg.dead_letter_capacity = 2;
    let (engine, conn) = engine_with(cfg);
    subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            max_retries: Some(0),
            ..Default::default()
        },
    );
    conn.fail_always(DeliveryError::permanent("gone"));
    for id in ["d1", "d2", "d3"] {
        engine.publish(model(id)).unwrap();
    }
    settle().await;

    let subjects: Vec<String> = engine
        .get_dead_letter_queue(10, 0)
        .iter()
        .map(|r| r.event.subject().to_string())
        .collect();
    assert_eq!(subjects, vec!["d3", "d2"]);
    assert_eq!(engine.get_metrics().dead_letter_evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn a_partial_batch_flushes_after_the_wait() {
    let (engine, conn) = engine_with(quick_config());
    subscribe(
        &engine,
        SubscriptionType::ModelUpdate,
        SubscriptionOptions {
            batch_size: Some(5),
            batch_timeout: Some(Duration::from_millis(5000)),
            ..Default::default()
        },
    );

    for id in ["p1", "p2", "p3"] {
        engine.publish(model(id)).unwrap();
    }
    sleep(Duration::from_millis(4990)).await;
    assert!(conn.batches().is_empty());

    sleep(Duration::from_millis(20)).await;
    assert_eq!(conn.batches(), vec![vec!["p1", "p2", "p3"]]);
}
