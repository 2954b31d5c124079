//! End-to-end proxy check cycles: matching, splaying, substitution, cancellation

use proxy_scheduler::actors::messages::CyclePhase;
use proxy_scheduler::actors::proxy_check::ProxyCheckHandle;
use proxy_scheduler::publish::BroadcastPublisher;
use proxy_scheduler::{Entity, ProxyRequests};
use serde_json::json;
use tokio::time::{Duration, Instant};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_dispatches_are_splayed_across_the_interval() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-ping", "ping {{ .name }}", &[]),
        create_test_context(create_entities("switch", 3), &publisher),
    );

    let start = Instant::now();
    let report = handle.run_now().await.unwrap();
    assert_eq!(report.matched, vec!["switch-1", "switch-2", "switch-3"]);
    assert_eq!(report.splay, Duration::from_secs(18));
    assert_eq!(handle.state().await.unwrap().phase, CyclePhase::Dispatching);

    // 60s interval, 90% coverage, 3 entities
    let expected = [
        ("switch-1", Duration::ZERO),
        ("switch-2", Duration::from_secs(18)),
        ("switch-3", Duration::from_secs(36)),
    ];

    for (name, offset) in expected {
        let event = next_event(&mut rx, 60).await;
        let elapsed = start.elapsed();

        assert_eq!(event.check.entity_name(), name);
        assert_eq!(event.check.command, format!("ping {name}"));
        assert!(
            elapsed >= offset && elapsed < offset + Duration::from_secs(1),
            "{name} fired after {elapsed:?}, expected {offset:?}"
        );
    }

    assert_no_event(&mut rx, 120).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_splay_coverage_from_check_is_used() {
    let publisher = BroadcastPublisher::with_capacity(16);

    let mut check = create_proxy_check("check-ping", "ping", &[]);
    check.interval = 100;
    check.proxy_requests = Some(ProxyRequests {
        entity_attributes: Vec::new(),
        splay_coverage: 50,
    });

    let handle = ProxyCheckHandle::spawn(
        check,
        create_test_context(create_entities("host", 5), &publisher),
    );

    let report = handle.run_now().await.unwrap();
    assert_eq!(report.splay, Duration::from_secs(10));
    assert_eq!(
        report.dispatch_offsets().last(),
        Some(&Duration::from_secs(40))
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_only_matching_entities_are_dispatched() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let entities = vec![
        Entity::new("router-1", "default").with_label("role", "router"),
        Entity::new("switch-1", "default").with_label("role", "switch"),
        Entity::new("router-2", "other").with_label("role", "router"),
    ];

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check(
            "check-bgp",
            "check_bgp {{ .name }}",
            &["entity.labels.role == 'router'"],
        ),
        create_test_context(entities, &publisher),
    );

    let report = handle.run_now().await.unwrap();

    // the other namespace is never fetched
    assert_eq!(report.candidates, 2);
    assert_eq!(report.matched, vec!["router-1"]);

    let event = next_event(&mut rx, 1).await;
    assert_eq!(event.check.command, "check_bgp router-1");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_substitution_leaves_template_untouched() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let entity = Entity::new("db-1", "default")
        .with_extended("ip", json!("10.0.0.5"))
        .with_extended("port", json!(5432));

    let mut check = create_proxy_check(
        "check-postgres",
        "check_pg -H {{ .ip }} -p {{ .port }} -w {{ .labels.warn | default \"80\" }}",
        &[],
    );
    check.env_vars = vec!["PGHOST={{ .ip }}".to_string()];

    let handle = ProxyCheckHandle::spawn(check, create_test_context(vec![entity], &publisher));
    handle.run_now().await.unwrap();

    let event = next_event(&mut rx, 1).await;
    assert_eq!(event.check.command, "check_pg -H 10.0.0.5 -p 5432 -w 80");
    assert_eq!(event.check.env_vars, vec!["PGHOST=10.0.0.5"]);
    assert_eq!(event.check.proxy_entity_name, "db-1");

    let state = handle.state().await.unwrap();
    assert!(state.check.command.contains("{{ .ip }}"));
    assert!(state.check.proxy_entity_name.is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_stops_remaining_dispatches() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-ping", "ping {{ .name }}", &[]),
        create_test_context(create_entities("switch", 3), &publisher),
    );

    handle.run_now().await.unwrap();

    let first = next_event(&mut rx, 1).await;
    assert_eq!(first.check.entity_name(), "switch-1");

    handle.cancel_pending().await.unwrap();
    assert_no_event(&mut rx, 120).await;

    let state = handle.state().await.unwrap();
    assert_eq!(state.phase, CyclePhase::Idle);
    assert_eq!(state.active_dispatchers, 0);
    assert_eq!(state.cycles_run, 1);

    // a new cycle after cancellation dispatches normally
    handle.run_now().await.unwrap();
    let event = next_event(&mut rx, 1).await;
    assert_eq!(event.check.entity_name(), "switch-1");

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_update_check_cancels_pending_dispatches() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-ping", "ping {{ .name }}", &[]),
        create_test_context(create_entities("switch", 3), &publisher),
    );

    handle.run_now().await.unwrap();
    next_event(&mut rx, 1).await;

    let updated = create_proxy_check("check-ping", "ping -c 3 {{ .name }}", &[]);
    handle.update_check(updated).await.unwrap();
    assert_no_event(&mut rx, 120).await;

    handle.run_now().await.unwrap();
    let event = next_event(&mut rx, 1).await;
    assert_eq!(event.check.command, "ping -c 3 switch-1");

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_dispatches() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-ping", "ping", &[]),
        create_test_context(create_entities("switch", 2), &publisher),
    );

    handle.run_now().await.unwrap();
    next_event(&mut rx, 1).await;

    handle.shutdown().await.unwrap();
    assert_no_event(&mut rx, 120).await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_trigger_runs_cycles() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let mut check = create_proxy_check("check-ping", "ping {{ .name }}", &[]);
    check.publish = true;
    check.interval = 10;

    let start = Instant::now();
    let handle = ProxyCheckHandle::spawn(
        check,
        create_test_context(create_entities("switch", 1), &publisher),
    );

    let event = next_event(&mut rx, 30).await;
    let elapsed = start.elapsed();
    assert_eq!(event.check.entity_name(), "switch-1");
    assert!(
        elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11),
        "first cycle after {elapsed:?}"
    );

    let event = next_event(&mut rx, 30).await;
    let elapsed = start.elapsed();
    assert_eq!(event.check.entity_name(), "switch-1");
    assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));

    let state = handle.state().await.unwrap();
    assert_eq!(state.cycles_run, 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unpublished_check_never_runs_on_its_own() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    let mut check = create_proxy_check("check-ping", "ping", &[]);
    check.interval = 10;

    let handle = ProxyCheckHandle::spawn(
        check,
        create_test_context(create_entities("switch", 1), &publisher),
    );

    assert_no_event(&mut rx, 60).await;
    assert_eq!(handle.state().await.unwrap().cycles_run, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cron_trigger_runs_cycles() {
    let publisher = BroadcastPublisher::with_capacity(16);
    let mut rx = publisher.subscribe();

    // every second
    let mut check =
        create_proxy_check("check-ping", "ping {{ .name }}", &[]).with_cron("* * * * * *");
    check.publish = true;

    let handle = ProxyCheckHandle::spawn(
        check,
        create_test_context(create_entities("switch", 1), &publisher),
    );

    let first = next_event(&mut rx, 5).await;
    let second = next_event(&mut rx, 5).await;
    assert_eq!(first.check.entity_name(), "switch-1");
    assert!(second.issued > first.issued);

    let state = handle.state().await.unwrap();
    assert!(state.cycles_run >= 2);
    assert_eq!(state.cycles_aborted, 0);

    handle.shutdown().await.unwrap();
}
