//! Failure tests for proxy check cycles
//!
//! These tests verify that failures stay contained:
//! - Expression errors drop one entity, not the cycle
//! - Substitution errors skip one dispatch, not the rest
//! - Schedule and catalog errors abort the cycle without publishing

use std::sync::Arc;

use assert_matches::assert_matches;
use proxy_scheduler::actors::proxy_check::ProxyCheckHandle;
use proxy_scheduler::error::{CycleError, SplayError};
use proxy_scheduler::publish::BroadcastPublisher;
use proxy_scheduler::{CheckConfig, Entity};
use serde_json::json;
use tokio::time::{Duration, Instant};

use crate::helpers::*;

#[tokio::test]
async fn test_missing_attribute_excludes_only_that_entity() {
    let publisher = BroadcastPublisher::with_capacity(16);

    let entities = vec![
        Entity::new("pdu-1", "default").with_extended("rack", json!("r1")),
        Entity::new("pdu-2", "default"),
        Entity::new("pdu-3", "default").with_extended("rack", json!("r1")),
    ];

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-pdu", "check_pdu {{ .name }}", &["entity.rack == 'r1'"]),
        create_test_context(entities, &publisher),
    );

    let report = handle.run_now().await.unwrap();
    assert_eq!(report.candidates, 3);
    assert_eq!(report.matched, vec!["pdu-1", "pdu-3"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_expression_matches_nothing() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-pdu", "check_pdu", &["entity.name =="]),
        create_test_context(create_entities("pdu", 3), &publisher),
    );

    let report = handle.run_now().await.unwrap();
    assert!(report.matched.is_empty());
    assert_eq!(report.splay, Duration::ZERO);

    assert_no_event(&mut rx, 1).await;

    let state = handle.state().await.unwrap();
    assert_eq!(state.cycles_run, 1);
    assert_eq!(state.cycles_aborted, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_token_skips_only_that_entity() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let entities = vec![
        Entity::new("cam-1", "default").with_extended("ip", json!("10.1.0.1")),
        Entity::new("cam-2", "default"),
        Entity::new("cam-3", "default").with_extended("ip", json!("10.1.0.3")),
    ];

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-cam", "check_http -H {{ .ip }}", &[]),
        create_test_context(entities, &publisher),
    );

    let start = Instant::now();
    let report = handle.run_now().await.unwrap();
    assert_eq!(report.matched.len(), 3);

    let first = next_event(&mut rx, 60).await;
    assert_eq!(first.check.command, "check_http -H 10.1.0.1");

    // cam-2 would have fired at 18s, cam-3 keeps its own slot
    let second = next_event(&mut rx, 60).await;
    assert_eq!(second.check.command, "check_http -H 10.1.0.3");
    assert!(start.elapsed() >= Duration::from_secs(36));

    assert_no_event(&mut rx, 120).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_cron_aborts_cycle() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let check = create_proxy_check("check-cron", "check", &[]).with_cron("61 * * * *");
    let handle = ProxyCheckHandle::spawn(
        check,
        create_test_context(create_entities("host", 2), &publisher),
    );

    let err = handle.run_now().await.unwrap_err();
    assert_matches!(
        err.downcast_ref::<CycleError>(),
        Some(CycleError::Schedule(SplayError::CronParse { .. }))
    );

    assert_no_event(&mut rx, 1).await;

    let state = handle.state().await.unwrap();
    assert_eq!(state.cycles_run, 0);
    assert_eq!(state.cycles_aborted, 1);
    assert!(state.last_cycle.is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_catalog_failure_aborts_cycle() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-ping", "ping", &[]),
        create_context_with_catalog(Arc::new(FailingCatalog), &publisher),
    );

    let err = handle.run_now().await.unwrap_err();
    let cycle_error = err.downcast_ref::<CycleError>();
    assert_matches!(cycle_error, Some(CycleError::Catalog(_)));
    assert!(err.to_string().contains("catalog offline"));

    assert_no_event(&mut rx, 1).await;

    // the actor survives and keeps answering
    let state = handle.state().await.unwrap();
    assert_eq!(state.cycles_aborted, 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_check_without_proxy_requests_dispatches_nothing() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let mut check = CheckConfig::new("local", "uptime", 60);
    check.publish = false;

    let handle = ProxyCheckHandle::spawn(
        check,
        create_test_context(create_entities("host", 2), &publisher),
    );

    let report = handle.run_now().await.unwrap();
    assert_eq!(report.candidates, 2);
    assert!(report.matched.is_empty());

    assert_no_event(&mut rx, 1).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publishing_without_subscribers_is_not_an_error() {
    let publisher = BroadcastPublisher::with_capacity(16);

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-ping", "ping", &[]),
        create_test_context(create_entities("host", 1), &publisher),
    );

    let report = handle.run_now().await.unwrap();
    assert_eq!(report.matched, vec!["host-1"]);

    handle.shutdown().await.unwrap();
}
