//! Error types for proxy check scheduling
//!
//! Errors are split by the scope they affect:
//!
//! - **Per entity**: [`ExpressionError`], [`SubstitutionError`]. The entity is
//!   skipped and the cycle carries on.
//! - **Per cycle**: [`SplayError`], [`CycleError`]. Nothing is dispatched for
//!   the check in that cycle.
//! - **Startup**: [`ConfigError`].

use thiserror::Error;

/// Result type alias for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised by a [`BooleanExpressionEvaluator`](crate::expression::BooleanExpressionEvaluator)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// The expression is malformed and can never evaluate
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The expression is well-formed but failed against the given bindings
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

/// Errors raised while rewriting a check template for one entity
#[derive(Debug, Error)]
pub enum SubstitutionError {
    /// One or more placeholders reference paths the entity does not have
    #[error("unmatched token(s) for entity {entity}: {}", tokens.join(", "))]
    TokenResolution { entity: String, tokens: Vec<String> },

    /// The template could not be converted to or from its intermediate form
    #[error("check serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while computing the splay delay of a cycle
#[derive(Debug, Error)]
pub enum SplayError {
    /// The check's cron expression could not be parsed
    #[error("invalid cron expression '{expression}': {reason}")]
    CronParse { expression: String, reason: String },

    /// The cron expression parsed but has no future occurrence
    #[error("cron expression '{0}' has no upcoming trigger")]
    NoUpcomingTrigger(String),
}

/// Errors that abort a whole proxy check cycle
#[derive(Debug, Error)]
pub enum CycleError {
    /// The entity catalog could not be read
    #[error("failed to fetch entities: {0:#}")]
    Catalog(anyhow::Error),

    /// The splay delay could not be computed
    #[error(transparent)]
    Schedule(#[from] SplayError),
}

/// Errors raised while loading the scheduler configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`Config`](crate::config::Config)
    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value in the configuration is out of range
    #[error("invalid configuration for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}
