//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use proxy_scheduler::actors::proxy_check::SchedulerContext;
use proxy_scheduler::catalog::{EntityCatalog, MemoryCatalog};
use proxy_scheduler::expression::SimpleEvaluator;
use proxy_scheduler::proxy::SplayPolicy;
use proxy_scheduler::publish::{BroadcastPublisher, CheckRequestEvent};
use proxy_scheduler::{CheckConfig, Entity, ProxyRequests};
use tokio::sync::broadcast;
use tokio::time::Duration;

/// Context over an in-memory catalog holding `entities`
pub fn create_test_context(
    entities: Vec<Entity>,
    publisher: &BroadcastPublisher,
) -> SchedulerContext {
    create_context_with_catalog(Arc::new(MemoryCatalog::with_entities(entities)), publisher)
}

pub fn create_context_with_catalog(
    catalog: Arc<dyn EntityCatalog>,
    publisher: &BroadcastPublisher,
) -> SchedulerContext {
    SchedulerContext {
        catalog,
        evaluator: Arc::new(SimpleEvaluator::new()),
        publisher: Arc::new(publisher.clone()),
        policy: SplayPolicy::default(),
    }
}

/// Proxy check that only runs when asked to
///
/// The timer is disabled so tests drive cycles with `run_now`.
pub fn create_proxy_check(name: &str, command: &str, expressions: &[&str]) -> CheckConfig {
    let mut check = CheckConfig::new(name, command, 60).with_proxy_requests(ProxyRequests {
        entity_attributes: expressions.iter().map(|e| e.to_string()).collect(),
        splay_coverage: 0,
    });
    check.publish = false;
    check
}

/// `count` proxy entities named `prefix-1` .. `prefix-count`
pub fn create_entities(prefix: &str, count: usize) -> Vec<Entity> {
    (1..=count)
        .map(|i| Entity::new(format!("{prefix}-{i}"), "default"))
        .collect()
}

/// Receive the next event or fail after `secs` seconds
pub async fn next_event(
    rx: &mut broadcast::Receiver<CheckRequestEvent>,
    secs: u64,
) -> CheckRequestEvent {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("timed out waiting for a check request")
        .expect("publisher channel closed")
}

/// Assert that nothing is published within `secs` seconds
pub async fn assert_no_event(rx: &mut broadcast::Receiver<CheckRequestEvent>, secs: u64) {
    let result = tokio::time::timeout(Duration::from_secs(secs), rx.recv()).await;
    assert!(result.is_err(), "unexpected check request: {result:?}");
}

/// Catalog that is always unreachable
pub struct FailingCatalog;

#[async_trait]
impl EntityCatalog for FailingCatalog {
    async fn list_entities(&self, _namespace: &str) -> anyhow::Result<Vec<Entity>> {
        Err(anyhow!("catalog offline"))
    }
}
