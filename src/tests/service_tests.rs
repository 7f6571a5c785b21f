//! Evaluation service tests
//!
//! The service runs on a paused tokio clock so monitor ticks are driven by
//! `sleep` and the tests stay deterministic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::{EngineConfig, EvalError};
use crate::remote::InMemoryRuntime;
use crate::runtime::{EngineEvent, EvalService, Watchdog};

use super::fixtures::{block, pair_graph, passes};

fn drain(events: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_burst_between_ticks_is_coalesced() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let (handle, mut events, _task) = EvalService::spawn(runtime.clone(), EngineConfig::default());

    for rate in 0..10 {
        handle
            .submit_block(block(1, "source").with_property("rate", rate))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = drain(&mut events);
    assert_eq!(passes(&events), 1);
    assert!(events.iter().filter(|e| **e == EngineEvent::HeartBeat).count() >= 2);
    assert_eq!(runtime.block_constructions(), 1);
    assert_eq!(runtime.block_property("/blocks/source", "rate"), Some(json!(9)));
}

#[tokio::test(start_paused = true)]
async fn test_command_backlog_does_not_starve_ticks() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let (handle, mut events, _task) = EvalService::spawn(runtime.clone(), EngineConfig::default());

    for rate in 0..1_000 {
        handle
            .submit_block(block(1, "source").with_property("rate", rate))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let events = drain(&mut events);
    // Passes ran while the backlog was still being drained
    assert!(passes(&events) >= 2);
    assert_eq!(runtime.block_constructions(), 1);
    assert_eq!(runtime.block_property("/blocks/source", "rate"), Some(json!(999)));
}

#[tokio::test(start_paused = true)]
async fn test_queries_do_not_evaluate() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let (handle, _events, _task) = EvalService::spawn(runtime.clone(), EngineConfig::default());

    handle.submit_topology(pair_graph()).unwrap();
    let dot = handle.topology_dot_markup("{}").await.unwrap();
    assert!(!dot.contains("b1"));
    assert_eq!(handle.topology_json_stats().await.unwrap(), None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let dot = handle.topology_dot_markup("{}").await.unwrap();
    assert!(dot.contains("b1:o0 -> b2:i0"));
}

#[tokio::test(start_paused = true)]
async fn test_activation_and_stats() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let (handle, _events, _task) = EvalService::spawn(runtime.clone(), EngineConfig::default());

    handle.submit_topology(pair_graph()).unwrap();
    handle.submit_activate_topology(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(runtime.is_active());
    let stats = handle.topology_json_stats().await.unwrap();
    assert!(stats.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_stops_service() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let (handle, _events, task) = EvalService::spawn(runtime.clone(), EngineConfig::default());

    handle.submit_topology(pair_graph()).unwrap();
    handle.submit_activate_topology(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.live_blocks(), 2);

    handle.cleanup().await.unwrap();
    task.await.unwrap();

    assert!(!runtime.is_active());
    assert_eq!(runtime.live_blocks(), 0);
    assert_eq!(runtime.live_environments(), 0);
    assert!(!handle.is_running());
    assert_eq!(handle.submit_topology(pair_graph()), Err(EvalError::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handles_cleans_up() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let (handle, _events, task) = EvalService::spawn(runtime.clone(), EngineConfig::default());

    handle.submit_topology(pair_graph()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.live_blocks(), 2);

    drop(handle);
    task.await.unwrap();
    assert_eq!(runtime.live_blocks(), 0);
    assert_eq!(runtime.live_environments(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_watchdog_fed() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let config = EngineConfig::default();
    let (handle, mut events, _task) = EvalService::spawn(runtime, config.clone());
    let mut watchdog = Watchdog::from_config(&config);

    handle.submit_topology(pair_graph()).unwrap();
    for _ in 0..200 {
        tokio::time::sleep(config.monitor_interval()).await;
        for event in drain(&mut events) {
            watchdog.observe(&event);
        }
        assert!(!watchdog.is_wedged());
    }
}
