use std::path::Path;
use std::time::Duration;

use tracing::trace;

use crate::check::{CheckConfig, DEFAULT_SPLAY_COVERAGE};
use crate::entity::Entity;
use crate::error::{ConfigError, ConfigResult};
use crate::expression::SimpleEvaluator;
use crate::proxy::SplayPolicy;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Check definitions; only those with `proxy_requests` are scheduled
    #[serde(default)]
    pub checks: Vec<CheckConfig>,

    /// Entities to seed the in-memory catalog with
    #[serde(default)]
    pub entities: Vec<Entity>,

    /// Scheduler tuning (optional - defaults apply)
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Splay coverage for checks that leave it unset
    #[serde(default = "default_splay_coverage")]
    pub default_splay_coverage: u32,

    /// Cron triggers closer than this many seconds are skipped
    #[serde(default = "default_min_cron_lead_secs")]
    pub min_cron_lead_secs: u64,

    /// Seconds past a skipped cron trigger to look up the next one from
    #[serde(default = "default_cron_shift_secs")]
    pub cron_shift_secs: u64,

    /// Capacity of the check request broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_splay_coverage: default_splay_coverage(),
            min_cron_lead_secs: default_min_cron_lead_secs(),
            cron_shift_secs: default_cron_shift_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SchedulerConfig {
    pub fn splay_policy(&self) -> SplayPolicy {
        SplayPolicy {
            default_coverage: self.default_splay_coverage,
            min_cron_lead: Duration::from_secs(self.min_cron_lead_secs),
            cron_shift: Duration::from_secs(self.cron_shift_secs),
        }
    }
}

fn default_splay_coverage() -> u32 {
    DEFAULT_SPLAY_COVERAGE
}

fn default_min_cron_lead_secs() -> u64 {
    5
}

fn default_cron_shift_secs() -> u64 {
    1
}

fn default_event_buffer() -> usize {
    256
}

impl Config {
    /// Check every definition and the scheduler settings
    pub fn validate(&self) -> ConfigResult<()> {
        let coverage = self.scheduler.default_splay_coverage;
        if coverage == 0 || coverage > 100 {
            return Err(ConfigError::Invalid {
                field: "scheduler.default_splay_coverage".to_string(),
                reason: format!("must be between 1 and 100, got {coverage}"),
            });
        }

        if self.scheduler.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.event_buffer".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let evaluator = SimpleEvaluator::new();
        for check in &self.checks {
            check.validate()?;

            let expressions = check.proxy_requests.iter().flat_map(|p| &p.entity_attributes);
            for (i, expression) in expressions.enumerate() {
                evaluator
                    .check_syntax(expression)
                    .map_err(|e| ConfigError::Invalid {
                        field: format!("checks.{}.proxy_requests.entity_attributes[{i}]", check.name),
                        reason: e.to_string(),
                    })?;
            }
        }

        let mut names: Vec<(&str, &str)> = self
            .checks
            .iter()
            .map(|c| (c.namespace.as_str(), c.name.as_str()))
            .collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid {
                field: format!("checks.{}", pair[0].1),
                reason: format!("duplicate check in namespace {}", pair[0].0),
            });
        }

        Ok(())
    }

    /// Checks that the proxy scheduler is responsible for
    pub fn proxy_checks(&self) -> impl Iterator<Item = &CheckConfig> {
        self.checks.iter().filter(|c| c.is_proxy_check())
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)?;
    config.validate()?;

    trace!("loaded config: {config:?}");
    Ok(config)
}
