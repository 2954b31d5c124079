//! Splay Scheduler
//!
//! Spreads the dispatches of one proxy check cycle over a fraction of the
//! check's period so that N matched entities do not all receive a request at
//! the same instant:
//!
//! ```text
//! period     = interval, or time until the next cron trigger
//! time slice = (coverage / 100) / N
//! splay      = period × time slice        (entity i fires at i × splay)
//! ```
//!
//! For cron checks a trigger closer than [`SplayPolicy::min_cron_lead`] is
//! skipped: the next occurrence is looked up again from
//! `trigger + cron_shift`, so the period never collapses to a few seconds.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::check::{CheckConfig, DEFAULT_SPLAY_COVERAGE};
use crate::error::SplayError;

/// Policy constants for splay computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplayPolicy {
    /// Coverage applied when a check leaves `splay_coverage` at 0
    pub default_coverage: u32,

    /// Cron triggers closer than this are considered too soon
    pub min_cron_lead: Duration,

    /// Offset past a too-soon trigger from which the next one is looked up
    pub cron_shift: Duration,
}

impl Default for SplayPolicy {
    fn default() -> Self {
        Self {
            default_coverage: DEFAULT_SPLAY_COVERAGE,
            min_cron_lead: Duration::from_secs(5),
            cron_shift: Duration::from_secs(1),
        }
    }
}

/// A parsed cron expression
///
/// Standard cron fires when either day field matches if both day-of-month and
/// day-of-week are restricted, while [`Schedule`] requires both. Such
/// expressions are kept as one schedule per day field and the earlier
/// trigger wins.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First trigger strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, SplayError> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
            .ok_or_else(|| SplayError::NoUpcomingTrigger(self.expression.clone()))
    }
}

/// Parse a cron expression
///
/// Accepts standard 5-field expressions (`min hour dom month dow`, Sunday = 0
/// or 7), 6/7-field expressions with a leading seconds field, and
/// descriptors such as `@hourly`.
pub fn parse_cron(expression: &str) -> Result<CronSchedule, SplayError> {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();

    let build = |normalized: &str| {
        Schedule::from_str(normalized).map_err(|e| SplayError::CronParse {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
    };

    let schedules = match fields.as_slice() {
        [minute, hour, dom, month, dow] => {
            let weekdays = standard_day_of_week(dow);
            if is_restricted(dom) && is_restricted(dow) {
                vec![
                    build(&format!("0 {minute} {hour} {dom} {month} *"))?,
                    build(&format!("0 {minute} {hour} * {month} {weekdays}"))?,
                ]
            } else {
                vec![build(&format!("0 {minute} {hour} {dom} {month} {weekdays}"))?]
            }
        }
        _ => vec![build(expression)?],
    };

    Ok(CronSchedule {
        expression: expression.to_string(),
        schedules,
    })
}

/// Whether a day field limits the days a schedule fires on
fn is_restricted(field: &str) -> bool {
    !field
        .split(',')
        .any(|part| part.starts_with('*') || part.starts_with('?'))
}

/// Translate a standard day-of-week field (Sunday = 0 or 7) to the
/// 1-based numbering of the `cron` crate (Sunday = 1)
fn standard_day_of_week(field: &str) -> String {
    let shift = |day: &str| match day.parse::<u8>() {
        Ok(n) if n <= 7 => (n % 7 + 1).to_string(),
        _ => day.to_string(),
    };

    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };

            let range = match range.split_once('-') {
                // `5-7` ends on Sunday, which wraps around to 1
                Some((start, "7")) if step.is_none() && start != "0" && start != "7" => {
                    format!("{}-7,1", shift(start))
                }
                Some((start, end)) => format!("{}-{}", shift(start), shift(end)),
                None => shift(range),
            };

            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Duration from `now` until the next cron trigger, honouring the lead guard
pub fn cron_period(
    expression: &str,
    now: DateTime<Utc>,
    policy: &SplayPolicy,
) -> Result<Duration, SplayError> {
    let schedule = parse_cron(expression)?;

    let then = schedule.next_after(now)?;
    let period = (then - now).to_std().unwrap_or(Duration::ZERO);
    if period >= policy.min_cron_lead {
        return Ok(period);
    }

    let shift = chrono::Duration::from_std(policy.cron_shift).unwrap_or(chrono::Duration::zero());
    let base = then + shift;
    let then = schedule.next_after(base)?;

    Ok((then - base).to_std().unwrap_or(Duration::ZERO))
}

/// The period a cycle of `check` is spread over
pub fn check_period(
    check: &CheckConfig,
    now: DateTime<Utc>,
    policy: &SplayPolicy,
) -> Result<Duration, SplayError> {
    if check.has_cron() {
        cron_period(&check.cron, now, policy)
    } else {
        Ok(Duration::from_secs(u64::from(check.interval)))
    }
}

/// Delay between successive dispatches for `num_entities` entities
///
/// `coverage` is taken as given (0 yields no delay). Zero entities yield no
/// delay as well.
pub fn splay_delay(period: Duration, num_entities: usize, coverage: u32) -> Duration {
    if num_entities == 0 {
        return Duration::ZERO;
    }

    let nanos = period.as_nanos() * u128::from(coverage) / (100 * num_entities as u128);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Splay delay for one cycle of `check` with `num_entities` matched entities
///
/// `now` is sampled once by the caller at cycle start.
pub fn calculate_splay_interval(
    check: &CheckConfig,
    num_entities: usize,
    now: DateTime<Utc>,
    policy: &SplayPolicy,
) -> Result<Duration, SplayError> {
    let period = check_period(check, now, policy)?;
    let coverage = check
        .proxy_requests
        .as_ref()
        .map_or(policy.default_coverage, |p| {
            p.effective_splay_coverage(policy.default_coverage)
        });

    Ok(splay_delay(period, num_entities, coverage))
}
