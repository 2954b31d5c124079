//! ProxyCheckActor - Drives proxy check cycles for one check definition
//!
//! ## Cycle
//!
//! ```text
//! Idle ─► Fetching ─► Matching ──(no match)──► Idle
//!                        │
//!                        ▼
//!                    Scheduling ──(cron error)──► Idle
//!                        │
//!                        ▼
//!                    Dispatching: entity i fires at start + i × splay ─► Idle
//! ```
//!
//! Fetching, matching and scheduling run inline in the actor. Dispatching is
//! handed to a separate task that waits for each entity's offset, checking
//! the cancellation signal between entities. Every fired entity gets its own
//! task for substitution and publishing, so a failing entity never holds up
//! the next one, and cancelling a cycle never interrupts a fired entity.
//!
//! ## Message Flow
//!
//! ```text
//! Trigger (interval / cron) → run cycle → dispatcher → [fire(entity) → CheckPublisher]
//!     ↑
//!     └─── Commands (RunNow, UpdateCheck, CancelPending, GetState, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::catalog::EntityCatalog;
use crate::check::CheckConfig;
use crate::entity::Entity;
use crate::error::{CycleError, SplayError};
use crate::expression::BooleanExpressionEvaluator;
use crate::proxy::splay::{CronSchedule, parse_cron};
use crate::proxy::{
    SplayPolicy, calculate_splay_interval, match_entities, substitute_proxy_entity_tokens,
};
use crate::publish::CheckPublisher;

use super::messages::{CyclePhase, CycleReport, ProxyCheckCommand, ProxyCheckState};

/// Collaborators shared by all proxy check actors
///
/// Everything in here is read-only or internally synchronized, so cloning
/// the context into many actors and dispatch tasks is cheap and safe.
#[derive(Clone)]
pub struct SchedulerContext {
    pub catalog: Arc<dyn EntityCatalog>,
    pub evaluator: Arc<dyn BooleanExpressionEvaluator>,
    pub publisher: Arc<dyn CheckPublisher>,
    pub policy: SplayPolicy,
}

/// Entities selected for one cycle and the delay between their dispatches
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub candidates: usize,
    pub entities: Vec<Entity>,
    pub splay: Duration,
}

/// Fetch, match and schedule one cycle of `check`
///
/// `now` is the wall-clock time sampled at cycle start; it is used for cron
/// arithmetic and not advanced during the cycle.
pub async fn plan_cycle(
    ctx: &SchedulerContext,
    check: &CheckConfig,
    now: DateTime<Utc>,
) -> Result<CyclePlan, CycleError> {
    let candidates = ctx
        .catalog
        .list_entities(&check.namespace)
        .await
        .map_err(CycleError::Catalog)?;

    let Some(proxy_requests) = &check.proxy_requests else {
        warn!("check has no proxy requests, nothing to dispatch");
        return Ok(CyclePlan {
            candidates: candidates.len(),
            entities: Vec::new(),
            splay: Duration::ZERO,
        });
    };

    let entities: Vec<Entity> = match_entities(&candidates, proxy_requests, ctx.evaluator.as_ref())
        .into_iter()
        .cloned()
        .collect();

    trace!("matched {} of {} entities", entities.len(), candidates.len());

    if entities.is_empty() {
        return Ok(CyclePlan {
            candidates: candidates.len(),
            entities,
            splay: Duration::ZERO,
        });
    }

    let splay = calculate_splay_interval(check, entities.len(), now, &ctx.policy)?;

    Ok(CyclePlan {
        candidates: candidates.len(),
        entities,
        splay,
    })
}

/// Fire each entity at `start + i × splay` until done or cancelled
///
/// Cancellation is checked before every entity. Entities that already fired
/// are not affected by it.
pub async fn dispatch_cycle(
    ctx: SchedulerContext,
    check: Arc<CheckConfig>,
    entities: Vec<Entity>,
    splay: Duration,
    start: Instant,
    mut cancel: watch::Receiver<bool>,
) {
    let total = entities.len();

    for (i, entity) in entities.into_iter().enumerate() {
        let deadline = start + splay.saturating_mul(i as u32);

        tokio::select! {
            biased;

            // a dropped sender means the actor is gone, which also cancels
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                debug!(check = %check.name, "cycle cancelled with {} of {total} dispatches pending", total - i);
                return;
            }

            _ = sleep_until(deadline) => {}
        }

        tokio::spawn(fire(ctx.clone(), Arc::clone(&check), entity));
    }

    trace!(check = %check.name, "all {total} dispatches fired");
}

/// Substitute tokens for one entity and publish the result
#[instrument(skip_all, fields(check = %check.name, entity = %entity.name))]
async fn fire(ctx: SchedulerContext, check: Arc<CheckConfig>, entity: Entity) {
    let substituted = match substitute_proxy_entity_tokens(&entity, &check) {
        Ok(substituted) => substituted,
        Err(e) => {
            error!("skipping proxy request: {e}");
            return;
        }
    };

    match ctx.publisher.publish(substituted).await {
        Ok(()) => trace!("published proxy request"),
        Err(e) => error!("failed to publish proxy request: {e:#}"),
    }
}

/// What wakes the actor up for its next cycle
enum Trigger {
    Interval(Interval),
    Cron {
        schedule: CronSchedule,
        /// Trigger the last completed wait was for
        last_fired: Option<DateTime<Utc>>,
    },
    /// Never fires; cycles only run on request
    Idle,
}

impl Trigger {
    fn new(check: &CheckConfig) -> Self {
        if !check.publish {
            debug!("check is not published, cycles run on request only");
            return Trigger::Idle;
        }

        if check.has_cron() {
            return match parse_cron(&check.cron) {
                Ok(schedule) => Trigger::Cron {
                    schedule,
                    last_fired: None,
                },
                Err(e) => {
                    error!("check will not be scheduled: {e}");
                    Trigger::Idle
                }
            };
        }

        if check.interval == 0 {
            warn!("check has neither a cron schedule nor an interval");
            return Trigger::Idle;
        }

        let period = Duration::from_secs(u64::from(check.interval));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Trigger::Interval(ticker)
    }

    /// Wait for the next trigger; cancel-safe
    async fn tick(&mut self) {
        match self {
            Trigger::Interval(ticker) => {
                ticker.tick().await;
            }
            Trigger::Cron {
                schedule,
                last_fired,
            } => {
                let now = Utc::now();
                match next_cron_fire(schedule, now, *last_fired) {
                    Ok(next) => {
                        sleep((next - now).to_std().unwrap_or(Duration::ZERO)).await;
                        *last_fired = Some(next);
                    }
                    Err(e) => {
                        error!("check will not be scheduled: {e}");
                        *self = Trigger::Idle;
                        std::future::pending::<()>().await;
                    }
                }
            }
            Trigger::Idle => std::future::pending::<()>().await,
        }
    }
}

/// Next cron trigger to wait for
///
/// The wait runs on the monotonic clock while triggers are wall-clock times,
/// so a wake-up can land just before the trigger it was for. Looking up from
/// the last fired trigger keeps that trigger from firing twice.
fn next_cron_fire(
    schedule: &CronSchedule,
    now: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>, SplayError> {
    let from = last_fired.map_or(now, |last| last.max(now));
    schedule.next_after(from)
}

/// Actor that schedules a single proxy check definition
///
/// Each definition gets its own actor; actors share nothing but the
/// read-only [`SchedulerContext`].
pub struct ProxyCheckActor {
    /// Current definition (shared with in-flight dispatch tasks)
    check: Arc<CheckConfig>,

    /// Catalog, evaluator, publisher and policy
    ctx: SchedulerContext,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<ProxyCheckCommand>,

    /// Cancellation signal for dispatches of the current generation
    cancel_tx: watch::Sender<bool>,

    /// Dispatcher tasks of recent cycles
    dispatchers: Vec<JoinHandle<()>>,

    cycles_run: u64,
    cycles_aborted: u64,
    last_cycle: Option<CycleReport>,
}

impl ProxyCheckActor {
    /// Create a new proxy check actor
    pub fn new(
        check: CheckConfig,
        ctx: SchedulerContext,
        command_rx: mpsc::Receiver<ProxyCheckCommand>,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);

        Self {
            check: Arc::new(check),
            ctx,
            command_rx,
            cancel_tx,
            dispatchers: Vec::new(),
            cycles_run: 0,
            cycles_aborted: 0,
            last_cycle: None,
        }
    }

    /// Run the actor's main loop
    ///
    /// This is the entry point for the actor. It runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self), fields(check = %self.check.name))]
    pub async fn run(mut self) {
        debug!("starting proxy check actor");

        let mut trigger = Trigger::new(&self.check);

        loop {
            tokio::select! {
                // Scheduled cycle
                _ = trigger.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("proxy check cycle aborted: {e}");
                    }
                }

                // Handle commands
                cmd = self.command_rx.recv() => {
                    // Command channel closed - exit
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        self.cancel_pending();
                        break;
                    };

                    match cmd {
                        ProxyCheckCommand::RunNow { respond_to } => {
                            debug!("received RunNow command");
                            let result = self.run_cycle().await;
                            if let Err(e) = &result {
                                error!("proxy check cycle aborted: {e}");
                            }
                            let _ = respond_to.send(result);
                        }

                        ProxyCheckCommand::UpdateCheck { check } => {
                            debug!("updating check definition");
                            self.cancel_pending();
                            self.check = Arc::new(*check);
                            trigger = Trigger::new(&self.check);
                        }

                        ProxyCheckCommand::CancelPending => {
                            debug!("received CancelPending command");
                            self.cancel_pending();
                        }

                        ProxyCheckCommand::GetState { respond_to } => {
                            let _ = respond_to.send(self.state());
                        }

                        ProxyCheckCommand::Shutdown => {
                            debug!("received shutdown command");
                            self.cancel_pending();
                            break;
                        }
                    }
                }
            }
        }

        debug!("proxy check actor stopped");
    }

    /// Run one cycle and hand its dispatches to a dispatcher task
    #[instrument(skip(self), fields(check = %self.check.name))]
    async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let start = Instant::now();
        let started = Utc::now();

        let plan = match plan_cycle(&self.ctx, &self.check, started).await {
            Ok(plan) => plan,
            Err(e) => {
                self.cycles_aborted += 1;
                return Err(e);
            }
        };

        let report = CycleReport {
            check: self.check.name.clone(),
            started,
            candidates: plan.candidates,
            matched: plan.entities.iter().map(|e| e.name.clone()).collect(),
            splay: plan.splay,
        };

        self.cycles_run += 1;
        self.last_cycle = Some(report.clone());
        self.dispatchers.retain(|handle| !handle.is_finished());

        if plan.entities.is_empty() {
            debug!("no entities matched, nothing to dispatch");
            return Ok(report);
        }

        info!(
            "dispatching to {} entities with splay {:?}",
            plan.entities.len(),
            plan.splay
        );

        self.dispatchers.push(tokio::spawn(dispatch_cycle(
            self.ctx.clone(),
            Arc::clone(&self.check),
            plan.entities,
            plan.splay,
            start,
            self.cancel_tx.subscribe(),
        )));

        Ok(report)
    }

    /// Signal all pending dispatches to stop and start a new generation
    fn cancel_pending(&mut self) {
        self.cancel_tx.send_replace(true);
        let (cancel_tx, _) = watch::channel(false);
        self.cancel_tx = cancel_tx;
        self.dispatchers.retain(|handle| !handle.is_finished());
    }

    fn state(&self) -> ProxyCheckState {
        let active_dispatchers = self.dispatchers.iter().filter(|h| !h.is_finished()).count();

        ProxyCheckState {
            check: self.check.as_ref().clone(),
            phase: if active_dispatchers > 0 {
                CyclePhase::Dispatching
            } else {
                CyclePhase::Idle
            },
            cycles_run: self.cycles_run,
            cycles_aborted: self.cycles_aborted,
            active_dispatchers,
            last_cycle: self.last_cycle.clone(),
        }
    }
}

/// Handle for controlling a ProxyCheckActor
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across tasks.
#[derive(Clone)]
pub struct ProxyCheckHandle {
    /// Command sender
    sender: mpsc::Sender<ProxyCheckCommand>,

    /// Check name for identification
    pub check_name: String,
}

impl ProxyCheckHandle {
    /// Spawn a new proxy check actor
    ///
    /// This creates the actor, spawns it as a tokio task, and returns a handle.
    pub fn spawn(check: CheckConfig, ctx: SchedulerContext) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let check_name = check.name.clone();

        let actor = ProxyCheckActor::new(check, ctx, cmd_rx);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            check_name,
        }
    }

    /// Run a cycle now and wait until its dispatches are scheduled
    ///
    /// A cycle-level failure is returned as a [`CycleError`] inside the
    /// `anyhow::Error`.
    pub async fn run_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProxyCheckCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        let report = rx.await.context("failed to receive response")??;
        Ok(report)
    }

    /// Replace the check definition
    pub async fn update_check(&self, check: CheckConfig) -> Result<()> {
        self.sender
            .send(ProxyCheckCommand::UpdateCheck {
                check: Box::new(check),
            })
            .await
            .context("failed to send UpdateCheck command")?;
        Ok(())
    }

    /// Cancel dispatches that have not fired yet
    pub async fn cancel_pending(&self) -> Result<()> {
        self.sender
            .send(ProxyCheckCommand::CancelPending)
            .await
            .context("failed to send CancelPending command")?;
        Ok(())
    }

    /// Get a snapshot of the actor state
    pub async fn state(&self) -> Result<ProxyCheckState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProxyCheckCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ProxyCheckCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Get the check name
    pub fn check_name(&self) -> &str {
        &self.check_name
    }
}
