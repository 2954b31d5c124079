//! Token Substituter
//!
//! Rewrites a check template for one entity. Placeholders look like
//!
//! ```text
//! {{ .system.hostname }}
//! {{ .labels.disk_warning | default "85" }}
//! ```
//!
//! and are resolved against the entity's [`AttributeView`]. The template is
//! serialized to a JSON tree, every string in the tree is rewritten, and the
//! tree is deserialized into a fresh [`CheckConfig`]. The template itself is
//! never touched.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::check::{CheckConfig, SubstitutedCheck};
use crate::entity::Entity;
use crate::error::SubstitutionError;

use super::attributes::AttributeView;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("token pattern is valid"));

static TOKEN_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\.([\w.\-]*)\s*(?:\|\s*default\s+("(?:[^"\\]|\\.)*"|[^\s"]+)\s*)?$"#)
        .expect("token body pattern is valid")
});

/// Produce the check instance for `entity` from the `check` template
pub fn substitute_proxy_entity_tokens(
    entity: &Entity,
    check: &CheckConfig,
) -> Result<SubstitutedCheck, SubstitutionError> {
    let view = AttributeView::from_entity(entity);

    let mut tree = serde_json::to_value(check)?;
    let mut unmatched = Vec::new();
    substitute_value(&mut tree, &view, &mut unmatched);

    if !unmatched.is_empty() {
        return Err(SubstitutionError::TokenResolution {
            entity: entity.name.clone(),
            tokens: unmatched,
        });
    }

    let substituted: CheckConfig = serde_json::from_value(tree)?;
    Ok(SubstitutedCheck::new(substituted, &entity.name))
}

/// Replace the placeholders in `text`, returning the unresolved ones on failure
pub fn substitute_tokens(text: &str, view: &AttributeView) -> Result<String, Vec<String>> {
    let mut unmatched = Vec::new();
    let out = replace(text, view, &mut unmatched);

    if unmatched.is_empty() {
        Ok(out)
    } else {
        Err(unmatched)
    }
}

fn substitute_value(value: &mut Value, view: &AttributeView, unmatched: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            if text.contains("{{") {
                *text = replace(text, view, unmatched);
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, view, unmatched);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_value(item, view, unmatched);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn replace(text: &str, view: &AttributeView, unmatched: &mut Vec<String>) -> String {
    TOKEN
        .replace_all(text, |caps: &Captures<'_>| match resolve(&caps[1], view) {
            Some(resolved) => resolved,
            None => {
                unmatched.push(caps[0].to_string());
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn resolve(body: &str, view: &AttributeView) -> Option<String> {
    let caps = TOKEN_BODY.captures(body)?;

    match view.get(&caps[1]) {
        Some(value) => Some(render(value)),
        None => caps.get(2).map(|default| unquote(default.as_str())),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn unquote(literal: &str) -> String {
    if literal.len() >= 2 && literal.starts_with('"') && literal.ends_with('"') {
        serde_json::from_str::<String>(literal)
            .unwrap_or_else(|_| literal[1..literal.len() - 1].to_string())
    } else {
        literal.to_string()
    }
}
