//! Inbound events driving scheduled cascades.

use std::time::Duration;

use supported_versions_core::{EventBindings, InboundEvent, ServerRegistry};
use tokio::sync::mpsc;

use crate::common::*;

fn ready() -> InboundEvent {
    InboundEvent::ServerReady {
        url: URL.to_string(),
    }
}

fn dismissed() -> InboundEvent {
    InboundEvent::DialogDismissed {
        url: URL.to_string(),
    }
}

fn healthy_sources() -> MockSources {
    MockSources::failing().with_server_info("7.1.3", Some(sign(&server_document())))
}

#[tokio::test(start_paused = true)]
async fn test_server_ready_runs_immediately() {
    let h = harness(healthy_sources(), test_config());
    let bindings = EventBindings::with_engine(h.engine.clone());

    assert!(bindings.handle(ready()));
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(h.sources.call_count(), 1);
    assert!(bindings.support_status(URL).await.unwrap().supported);
}

#[tokio::test(start_paused = true)]
async fn test_dismissals_are_debounced() {
    let h = harness(healthy_sources(), test_config());
    let bindings = EventBindings::with_engine(h.engine.clone());

    for _ in 0..3 {
        assert!(bindings.handle(dismissed()));
        tokio::time::advance(Duration::from_millis(30)).await;
    }
    assert_eq!(h.sources.call_count(), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.sources.call_count(), 1);

    // Inside the throttle window a dismissal is dropped.
    assert!(!bindings.handle(dismissed()));
    assert!(!bindings.scheduler().has_pending(URL));

    // A manual refresh is not.
    assert!(bindings.refresh(URL));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.sources.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_cascades_are_retried_and_counted() {
    let h = harness(MockSources::failing(), test_config());
    let bindings = EventBindings::with_engine(h.engine.clone());

    bindings.refresh(URL);
    tokio::time::sleep(Duration::from_secs(120)).await;

    // Three scheduled attempts, four source calls each.
    assert_eq!(h.sources.call_count(), 12);
    assert_eq!(h.registry.get(URL).unwrap().version_check_failure_count, 3);
    assert!(bindings.scheduler().is_failure_threshold_reached(URL));
    assert!(!bindings.scheduler().has_pending(URL));
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count() {
    let h = harness(healthy_sources(), test_config());
    h.registry.increment_failure_count(URL);
    h.registry.increment_failure_count(URL);
    let bindings = EventBindings::with_engine(h.engine.clone());

    bindings.refresh(URL);
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(bindings.scheduler().failure_count(URL), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_dispatches_channel_events() {
    let h = harness(healthy_sources(), test_config());
    let bindings = EventBindings::with_engine(h.engine.clone());
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = tokio::spawn(bindings.run(rx));

    tx.send(ready()).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.sources.call_count(), 1);

    drop(tx);
    dispatcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_lets_accepted_checks_finish() {
    let h = harness(healthy_sources(), test_config());
    let bindings = EventBindings::with_engine(h.engine.clone());
    let scheduler = bindings.scheduler().clone();
    let (tx, rx) = mpsc::unbounded_channel();

    tx.send(ready()).unwrap();
    drop(tx);
    bindings.run(rx).await;

    assert_eq!(h.sources.call_count(), 1);
    assert!(h.engine.cache().get(URL).is_some());
    assert_eq!(scheduler.pending_count(), 0);
    assert!(!scheduler.is_running(URL));
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_waits_for_retries() {
    let h = harness(MockSources::failing(), test_config());
    let bindings = EventBindings::with_engine(h.engine.clone());
    let (tx, rx) = mpsc::unbounded_channel();

    tx.send(ready()).unwrap();
    drop(tx);
    bindings.run(rx).await;

    assert_eq!(h.sources.call_count(), 12);
    assert_eq!(h.registry.get(URL).unwrap().version_check_failure_count, 3);
}
