use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use proxy_scheduler::{
    actors::proxy_check::{ProxyCheckHandle, SchedulerContext},
    catalog::MemoryCatalog,
    config::{Config, read_config_file},
    expression::SimpleEvaluator,
    publish::{BroadcastPublisher, CheckRequestEvent},
    util::{get_config_path, get_log_level},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let level = get_log_level();
    let filter = filter::Targets::new().with_targets(vec![
        ("proxy_scheduler", level),
        ("proxy_schedulerd", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let config = read_config_file(&path)?;

    let publisher = BroadcastPublisher::with_capacity(config.scheduler.event_buffer);
    tokio::spawn(log_requests(publisher.subscribe()));

    let handles = dispatch_checks(&config, publisher);
    info!("scheduling {} proxy checks", handles.len());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    for result in join_all(handles.iter().map(|handle| handle.shutdown())).await {
        if let Err(e) = result {
            error!("{e:#}");
        }
    }

    Ok(())
}

fn dispatch_checks(config: &Config, publisher: BroadcastPublisher) -> Vec<ProxyCheckHandle> {
    let ctx = SchedulerContext {
        catalog: Arc::new(MemoryCatalog::with_entities(config.entities.clone())),
        evaluator: Arc::new(SimpleEvaluator::new()),
        publisher: Arc::new(publisher),
        policy: config.scheduler.splay_policy(),
    };

    for check in config.checks.iter().filter(|c| !c.is_proxy_check()) {
        warn!("ignoring check {} without proxy requests", check.name);
    }

    config
        .proxy_checks()
        .map(|check| {
            debug!("starting proxy check {} in {}", check.name, check.namespace);
            ProxyCheckHandle::spawn(check.clone(), ctx.clone())
        })
        .collect()
}

async fn log_requests(mut rx: broadcast::Receiver<CheckRequestEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!("check request: {json}"),
                Err(e) => error!("failed to serialize check request: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("request logger lagged, skipped {skipped} requests");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
