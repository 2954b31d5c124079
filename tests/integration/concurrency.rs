//! Concurrency tests for independent proxy check actors

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use proxy_scheduler::actors::proxy_check::ProxyCheckHandle;
use proxy_scheduler::catalog::MemoryCatalog;
use proxy_scheduler::publish::BroadcastPublisher;
use proxy_scheduler::Entity;

use crate::helpers::*;

fn fleet() -> Vec<Entity> {
    vec![
        Entity::new("router-1", "default").with_label("role", "router"),
        Entity::new("switch-1", "default").with_label("role", "switch"),
        Entity::new("switch-2", "default").with_label("role", "switch"),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_checks_run_independently() {
    let publisher = BroadcastPublisher::with_capacity(64);
    let mut rx = publisher.subscribe();
    let ctx = create_test_context(fleet(), &publisher);

    let routers = ProxyCheckHandle::spawn(
        create_proxy_check("check-bgp", "bgp {{ .name }}", &["entity.labels.role == 'router'"]),
        ctx.clone(),
    );
    let switches = ProxyCheckHandle::spawn(
        create_proxy_check("check-stp", "stp {{ .name }}", &["entity.labels.role == 'switch'"]),
        ctx,
    );

    let (r, s) = tokio::join!(routers.run_now(), switches.run_now());
    assert_eq!(r.unwrap().matched, vec!["router-1"]);
    assert_eq!(s.unwrap().matched, vec!["switch-1", "switch-2"]);

    let mut commands = BTreeSet::new();
    for _ in 0..3 {
        commands.insert(next_event(&mut rx, 120).await.check.command.clone());
    }

    assert_eq!(
        commands,
        BTreeSet::from([
            "bgp router-1".to_string(),
            "stp switch-1".to_string(),
            "stp switch-2".to_string(),
        ])
    );

    routers.shutdown().await.unwrap();
    switches.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failing_check_does_not_block_others() {
    let publisher = BroadcastPublisher::with_capacity(64);
    let mut rx = publisher.subscribe();
    let ctx = create_test_context(fleet(), &publisher);

    let broken = ProxyCheckHandle::spawn(
        create_proxy_check("check-broken", "x", &[]).with_cron("not a cron"),
        ctx.clone(),
    );
    let healthy = ProxyCheckHandle::spawn(
        create_proxy_check("check-bgp", "bgp {{ .name }}", &["entity.labels.role == 'router'"]),
        ctx,
    );

    assert!(broken.run_now().await.is_err());
    healthy.run_now().await.unwrap();

    let event = next_event(&mut rx, 1).await;
    assert_eq!(event.check.command, "bgp router-1");

    broken.shutdown().await.unwrap();
    healthy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_many_actors_shut_down_concurrently() {
    let publisher = BroadcastPublisher::with_capacity(64);
    let ctx = create_test_context(fleet(), &publisher);

    let handles: Vec<_> = (0..10)
        .map(|i| {
            ProxyCheckHandle::spawn(
                create_proxy_check(&format!("check-{i}"), "ping", &[]),
                ctx.clone(),
            )
        })
        .collect();

    let states = join_all(handles.iter().map(|h| h.state())).await;
    assert!(states.iter().all(|s| s.is_ok()));

    let results = join_all(handles.iter().map(|h| h.shutdown())).await;
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_catalog_changes_are_seen_by_next_cycle() {
    let publisher = BroadcastPublisher::with_capacity(64);
    let catalog = Arc::new(MemoryCatalog::with_entities(fleet()));

    let handle = ProxyCheckHandle::spawn(
        create_proxy_check("check-bgp", "bgp", &["entity.labels.role == 'router'"]),
        create_context_with_catalog(catalog.clone(), &publisher),
    );

    assert_eq!(handle.run_now().await.unwrap().matched.len(), 1);

    catalog
        .upsert(Entity::new("router-2", "default").with_label("role", "router"))
        .await;
    assert_eq!(handle.run_now().await.unwrap().matched.len(), 2);

    catalog.remove("default", "router-1").await;
    assert_eq!(handle.run_now().await.unwrap().matched, vec!["router-2"]);

    handle.shutdown().await.unwrap();
}
