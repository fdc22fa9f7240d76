//! Flat dotted-key settings

use crate::error::{Result, SettingsError};
use serde_yaml::Value;
use shardkeep_core::ByteSizeValue;
use std::collections::BTreeMap;
use std::path::Path;

/// Immutable map of setting keys (`store.throttle.type`) to raw values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// No settings
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building settings
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Parse YAML; nested mappings are flattened into dotted keys.
    ///
    /// ```yaml
    /// store:
    ///   throttle:
    ///     type: merge
    /// ```
    /// yields `store.throttle.type = merge`.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::empty());
        }
        let root: Value = serde_yaml::from_str(content)?;
        let mut values = BTreeMap::new();
        match root {
            Value::Null => {}
            Value::Mapping(_) => flatten("", &root, &mut values)?,
            _ => {
                return Err(SettingsError::Parse(
                    "settings document must be a mapping".to_string(),
                ))
            }
        }
        Ok(Self { values })
    }

    /// Load YAML settings from a file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Raw value of a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw value of a key, or `default` when absent
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Value of a key parsed as a byte size; `Ok(None)` when absent
    pub fn get_as_bytes_size(&self, key: &str) -> Result<Option<ByteSizeValue>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => ByteSizeValue::parse(raw)
                .map(Some)
                .map_err(|e| SettingsError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no keys
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Settings with `other`'s values layered on top
    pub fn merged_with(&self, other: &Settings) -> Settings {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Settings { values }
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) -> Result<()> {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let key = scalar_to_string(k).ok_or_else(|| {
                    SettingsError::Parse(format!("non-scalar key under [{}]", prefix))
                })?;
                let full = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&full, v, out)?;
            }
        }
        Value::Null => {}
        Value::Sequence(_) => {
            return Err(SettingsError::Parse(format!(
                "setting [{}] must be a scalar, got a list",
                prefix
            )))
        }
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out)?,
        scalar => {
            if let Some(s) = scalar_to_string(scalar) {
                out.insert(prefix.to_string(), s);
            }
        }
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Builder for `Settings`
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    values: BTreeMap<String, String>,
}

impl SettingsBuilder {
    /// Set a key
    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Finish
    pub fn build(self) -> Settings {
        Settings {
            values: self.values,
        }
    }
}
