//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to a specific actor via mpsc
//! 2. **Events**: Check requests are broadcast through the configured
//!    [`CheckPublisher`](crate::publish::CheckPublisher)
//! 3. **Snapshots**: State queries return owned copies, never references into the actor

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::check::CheckConfig;
use crate::error::CycleError;

/// Commands that can be sent to a ProxyCheckActor
#[derive(Debug)]
pub enum ProxyCheckCommand {
    /// Run a cycle immediately (bypassing the schedule)
    ///
    /// Responds once every dispatch of the cycle has been scheduled, not when
    /// they have fired.
    RunNow {
        respond_to: oneshot::Sender<Result<CycleReport, CycleError>>,
    },

    /// Replace the check definition
    ///
    /// Pending dispatches of earlier cycles are cancelled and the schedule is
    /// restarted from the new definition.
    UpdateCheck { check: Box<CheckConfig> },

    /// Cancel all dispatches that have not fired yet
    CancelPending,

    /// Get a snapshot of the actor state
    GetState {
        respond_to: oneshot::Sender<ProxyCheckState>,
    },

    /// Cancel pending dispatches and stop the actor
    Shutdown,
}

/// Outcome of the scheduling part of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Check name
    pub check: String,

    /// When the cycle started (the instant splay offsets are measured from)
    pub started: DateTime<Utc>,

    /// Number of entities fetched from the catalog
    pub candidates: usize,

    /// Names of matched entities, in dispatch order
    pub matched: Vec<String>,

    /// Delay between successive dispatches
    pub splay: Duration,
}

impl CycleReport {
    /// Offset from cycle start at which each matched entity is dispatched
    pub fn dispatch_offsets(&self) -> Vec<Duration> {
        (0..self.matched.len())
            .map(|i| self.splay.saturating_mul(i as u32))
            .collect()
    }
}

/// Where a ProxyCheckActor is between commands
///
/// Fetching, matching and scheduling run inline in the actor, so a snapshot
/// only ever observes the actor idle or with dispatches outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Dispatching,
}

/// Snapshot of a ProxyCheckActor
#[derive(Debug, Clone)]
pub struct ProxyCheckState {
    /// Current check definition
    pub check: CheckConfig,

    pub phase: CyclePhase,

    /// Cycles that reached dispatching or ended with no matches
    pub cycles_run: u64,

    /// Cycles aborted by a catalog or schedule error
    pub cycles_aborted: u64,

    /// Cycles whose dispatches are still pending
    pub active_dispatchers: usize,

    /// Report of the most recent successful cycle
    pub last_cycle: Option<CycleReport>,
}
