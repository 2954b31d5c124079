use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::entity::default_namespace;
use crate::error::{ConfigError, ConfigResult};
use crate::proxy::splay::parse_cron;

/// Splay coverage used when a check leaves it unset (or sets it to 0)
pub const DEFAULT_SPLAY_COVERAGE: u32 = 90;

/// A check definition
///
/// For proxy checks this is a template: string fields may contain
/// `{{ .path }}` placeholders that are resolved per matched entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub command: String,

    /// Interval between executions in seconds (ignored if `cron` is set)
    #[serde(default)]
    pub interval: u32,

    /// Cron schedule, takes precedence over `interval`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cron: String,

    #[serde(default)]
    pub subscriptions: Vec<String>,

    #[serde(default)]
    pub handlers: Vec<String>,

    /// Execution timeout in seconds, 0 for none
    #[serde(default)]
    pub timeout: u32,

    /// Time to live of the result in seconds, 0 for none
    #[serde(default)]
    pub ttl: i64,

    #[serde(default = "default_publish")]
    pub publish: bool,

    #[serde(default)]
    pub env_vars: Vec<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_requests: Option<ProxyRequests>,

    /// Entity the check runs on behalf of, set on substituted checks only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_entity_name: String,
}

/// Selects the entities a proxy check runs for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequests {
    /// Boolean expressions, all of which must hold for an entity to match
    #[serde(default)]
    pub entity_attributes: Vec<String>,

    /// Percentage (0-100) of the check period over which requests are spread
    #[serde(default)]
    pub splay_coverage: u32,
}

fn default_publish() -> bool {
    true
}

impl ProxyRequests {
    /// The coverage to apply, falling back to `default` when unset
    pub fn effective_splay_coverage(&self, default: u32) -> u32 {
        if self.splay_coverage == 0 {
            default
        } else {
            self.splay_coverage
        }
    }
}

impl CheckConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>, interval: u32) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            command: command.into(),
            interval,
            cron: String::new(),
            subscriptions: Vec::new(),
            handlers: Vec::new(),
            timeout: 0,
            ttl: 0,
            publish: true,
            env_vars: Vec::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            proxy_requests: None,
            proxy_entity_name: String::new(),
        }
    }

    pub fn with_proxy_requests(mut self, proxy_requests: ProxyRequests) -> Self {
        self.proxy_requests = Some(proxy_requests);
        self
    }

    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = cron.into();
        self
    }

    pub fn is_proxy_check(&self) -> bool {
        self.proxy_requests.is_some()
    }

    pub fn has_cron(&self) -> bool {
        !self.cron.trim().is_empty()
    }

    /// Validate the definition before it is scheduled
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "check name must not be empty"));
        }

        if self.has_cron() {
            parse_cron(&self.cron).map_err(|e| invalid(&self.field("cron"), e.to_string()))?;
        } else if self.interval == 0 {
            return Err(invalid(
                &self.field("interval"),
                "must specify either a positive interval or a cron schedule",
            ));
        }

        let coverage = self.proxy_requests.as_ref().map_or(0, |p| p.splay_coverage);
        if coverage > 100 {
            return Err(invalid(
                &self.field("proxy_requests.splay_coverage"),
                "splay coverage must be between 0 and 100",
            ));
        }

        Ok(())
    }

    fn field(&self, name: &str) -> String {
        format!("checks.{}.{name}", self.name)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// A check instance rewritten for one matched entity
///
/// Always carries the originating entity in `proxy_entity_name` and shares
/// nothing with the template it was produced from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SubstitutedCheck(CheckConfig);

impl SubstitutedCheck {
    pub(crate) fn new(mut check: CheckConfig, entity_name: &str) -> Self {
        check.proxy_entity_name = entity_name.to_string();
        Self(check)
    }

    pub fn entity_name(&self) -> &str {
        &self.0.proxy_entity_name
    }

    pub fn into_inner(self) -> CheckConfig {
        self.0
    }
}

impl Deref for SubstitutedCheck {
    type Target = CheckConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
