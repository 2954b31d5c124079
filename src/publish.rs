//! Check request publishing
//!
//! Resolved check instances are handed to a [`CheckPublisher`]. The
//! [`BroadcastPublisher`] fans them out over a Tokio broadcast channel so any
//! number of consumers (agents transport, logging, tests) can subscribe.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::check::SubstitutedCheck;

/// Event published for every dispatched proxy check
#[derive(Debug, Clone, Serialize)]
pub struct CheckRequestEvent {
    /// The check instance for one entity
    pub check: SubstitutedCheck,

    /// When the request was published
    pub issued: DateTime<Utc>,
}

/// Sink for resolved check instances
#[async_trait]
pub trait CheckPublisher: Send + Sync {
    async fn publish(&self, check: SubstitutedCheck) -> Result<()>;
}

/// Publisher backed by a broadcast channel
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<CheckRequestEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher with its own channel of the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckRequestEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl CheckPublisher for BroadcastPublisher {
    async fn publish(&self, check: SubstitutedCheck) -> Result<()> {
        let event = CheckRequestEvent {
            check,
            issued: Utc::now(),
        };

        // No subscribers is fine, the request is simply not consumed
        match self.sender.send(event) {
            Ok(num_receivers) => {
                trace!("published check request to {num_receivers} receivers");
            }
            Err(_) => {
                trace!("no receivers for check request");
            }
        }

        Ok(())
    }
}
