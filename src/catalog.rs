//! Read-only lookup of the plugin actions a compiled workflow may call.
use crate::error::ConfigError;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;

/// Describes the parameters a plugin action accepts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn with_required<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let required: Vec<String> = required.into_iter().map(Into::into).collect();
        let parameters = required
            .iter()
            .map(|name| (name.clone(), ParameterSpec::default()))
            .collect();
        Self {
            parameters,
            required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default, rename = "type")]
    pub param_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
}

/// The plugin subsystem's view of available actions, treated as an immutable
/// snapshot for the duration of one compilation.
pub trait CapabilityCatalog: Send + Sync {
    fn has_plugin(&self, plugin_key: &str) -> bool;

    fn has_operation(&self, plugin_key: &str, operation_key: &str) -> bool {
        self.action_schema(plugin_key, operation_key).is_some()
    }

    fn action_schema(&self, plugin_key: &str, operation_key: &str) -> Option<&ParameterSchema>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDefinition {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub actions: AHashMap<String, ParameterSchema>,
}

/// A catalog held entirely in memory, built in code or loaded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    #[serde(default)]
    plugins: AHashMap<String, PluginDefinition>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action, creating the plugin entry on first use.
    pub fn with_action(
        mut self,
        plugin_key: &str,
        operation_key: &str,
        schema: ParameterSchema,
    ) -> Self {
        self.register_action(plugin_key, operation_key, schema);
        self
    }

    pub fn register_action(
        &mut self,
        plugin_key: &str,
        operation_key: &str,
        schema: ParameterSchema,
    ) {
        self.plugins
            .entry(plugin_key.to_string())
            .or_default()
            .actions
            .insert(operation_key.to_string(), schema);
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }
}

impl CapabilityCatalog for InMemoryCatalog {
    fn has_plugin(&self, plugin_key: &str) -> bool {
        self.plugins.contains_key(plugin_key)
    }

    fn action_schema(&self, plugin_key: &str, operation_key: &str) -> Option<&ParameterSchema> {
        self.plugins
            .get(plugin_key)
            .and_then(|p| p.actions.get(operation_key))
    }
}
