//! Configuration context handed to factories and `init` hooks
//!
//! A context is a JSON object tree. The effective context of an extension is
//! the ancestor containers' context, deep-merged with the container's own
//! configuration, deep-merged with the configuration passed to `use_extension`.

use crate::error::{ComposeError, ComposeResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Resolved configuration for one extension in one container
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    config: Value,
    container_path: Vec<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            config: Value::Object(Map::new()),
            container_path: Vec::new(),
        }
    }
}

impl Context {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object
    pub fn from_value(config: Value) -> ComposeResult<Self> {
        if !config.is_object() {
            return Err(ComposeError::ContextInvalid {
                section: "<root>".to_string(),
                reason: "context configuration must be an object".to_string(),
            });
        }
        Ok(Self {
            config,
            container_path: Vec::new(),
        })
    }

    /// Return a copy with `overlay` deep-merged over this context
    pub fn merged(&self, overlay: &Value) -> Self {
        let mut config = self.config.clone();
        deep_merge(&mut config, overlay);
        Self {
            config,
            container_path: self.container_path.clone(),
        }
    }

    /// Return a copy scoped one container deeper
    pub(crate) fn nested(&self, container: &str) -> Self {
        let mut container_path = self.container_path.clone();
        container_path.push(container.to_string());
        Self {
            config: self.config.clone(),
            container_path,
        }
    }

    /// The raw configuration tree
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Container names from the root down to the container being built
    pub fn container_path(&self) -> &[String] {
        &self.container_path
    }

    /// Look up a value by dot-separated path (e.g. `"store.pool.size"`)
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.config, |value, segment| value.get(segment))
    }

    /// Deserialize a section of the context into a typed value
    pub fn section<T: DeserializeOwned>(&self, path: &str) -> ComposeResult<T> {
        let value = self.get(path).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| ComposeError::ContextInvalid {
            section: path.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Merge `overlay` into `base`: objects merge key by key, anything else replaces.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        // null overlays carry no configuration
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay.clone(),
    }
}
