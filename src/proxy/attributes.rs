//! Attribute View Builder
//!
//! Flattens an [`Entity`] into a single JSON object so expressions and
//! placeholders can address fixed fields (`system.os`, `labels.region`) and
//! extended attributes (`rack`) the same way. Extended attributes are laid
//! over the fixed fields and win on key collision.

use serde_json::{Map, Value, json};

use crate::entity::Entity;

/// Read-only, dotted-path addressable projection of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeView {
    name: String,
    root: Value,
}

impl AttributeView {
    /// Build the view for `entity`; the entity itself is left untouched
    pub fn from_entity(entity: &Entity) -> Self {
        let mut root = Map::new();

        root.insert("name".into(), json!(entity.name));
        root.insert("namespace".into(), json!(entity.namespace));
        root.insert("labels".into(), json!(entity.labels));
        root.insert("annotations".into(), json!(entity.annotations));
        root.insert("entity_class".into(), json!(entity.entity_class));
        root.insert("system".into(), json!(entity.system));
        root.insert("subscriptions".into(), json!(entity.subscriptions));
        root.insert("last_seen".into(), json!(entity.last_seen));
        root.insert("deregister".into(), json!(entity.deregister));
        root.insert("user".into(), json!(entity.user));

        for (key, value) in &entity.extended {
            root.insert(key.clone(), value.clone());
        }

        Self {
            name: entity.name.clone(),
            root: Value::Object(root),
        }
    }

    /// Name of the entity this view was built from
    pub fn entity_name(&self) -> &str {
        &self.name
    }

    /// Look up a dotted path such as `system.os` or `labels.region`
    ///
    /// Array elements can be addressed by numeric segment (`ports.0`).
    /// An empty path returns the whole view.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// The view as a JSON object, suitable as an expression binding
    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

/// Resolve a dotted path against a JSON value
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
