use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entity class for entities that only exist as check targets
pub const ENTITY_CLASS_PROXY: &str = "proxy";

/// A monitored entity (host, device, service endpoint)
///
/// Entities are owned by the catalog and are read-only to the scheduler.
/// Besides the fixed fields, an entity carries an open map of extended
/// attributes which is merged into its [`AttributeView`](crate::proxy::AttributeView).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default = "default_entity_class")]
    pub entity_class: String,

    #[serde(default)]
    pub system: System,

    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Unix timestamp of the last keepalive, 0 if never seen
    #[serde(default)]
    pub last_seen: i64,

    #[serde(default)]
    pub deregister: bool,

    #[serde(default)]
    pub user: String,

    /// Custom attributes, arbitrary JSON values keyed by name
    #[serde(default, rename = "extended_attributes")]
    pub extended: Map<String, Value>,
}

/// System facts reported by an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct System {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub platform_family: String,
    #[serde(default)]
    pub platform_version: String,
    #[serde(default)]
    pub arch: String,
}

impl Entity {
    /// Create a proxy entity in the given namespace with no attributes set
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            entity_class: default_entity_class(),
            system: System::default(),
            subscriptions: Vec::new(),
            last_seen: 0,
            deregister: false,
            user: String::new(),
            extended: Map::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_extended(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extended.insert(key.into(), value);
        self
    }
}

pub(crate) fn default_namespace() -> String {
    String::from("default")
}

fn default_entity_class() -> String {
    String::from(ENTITY_CLASS_PROXY)
}
