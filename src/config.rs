//! Structured configuration documents.
//!
//! The discretization never talks to a scripting runtime. It reads settings through
//! [`ConfigReader`], a get-by-key capability with defaults, implemented here by [`Settings`],
//! a thin wrapper around a `serde_json::Value` tree.

use crate::error::DiscretizationError;
use eyre::{eyre, WrapErr};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Read-only access to a nested key-value configuration.
///
/// Keys whose value is `null` are treated as absent.
pub trait ConfigReader {
    /// The raw value stored under `key`, if any.
    fn value(&self, key: &str) -> Option<&Value>;

    /// Dotted path of this section, used to report the offending key.
    fn section_path(&self) -> &str;

    fn key_path(&self, key: &str) -> String {
        if self.section_path().is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.section_path(), key)
        }
    }

    fn has_key(&self, key: &str) -> bool {
        self.value(key).map(|v| !v.is_null()).unwrap_or(false)
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> eyre::Result<Option<T>> {
        match self.value(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| DiscretizationError::config(self.key_path(key), err.to_string()).into()),
        }
    }

    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> eyre::Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    fn get_required<T: DeserializeOwned>(&self, key: &str) -> eyre::Result<T> {
        self.get(key)?
            .ok_or_else(|| DiscretizationError::config(self.key_path(key), "required key is missing").into())
    }
}

/// A configuration section backed by a JSON value tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    path: String,
    value: Value,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_value(Value::Object(Default::default()))
    }
}

impl Settings {
    pub fn from_value(value: Value) -> Self {
        Self {
            path: String::new(),
            value,
        }
    }

    pub fn from_json_str(json: &str) -> eyre::Result<Self> {
        let value: Value = serde_json::from_str(json).wrap_err("failed to parse settings document")?;
        if !value.is_object() {
            return Err(eyre!("settings document must be an object at the top level"));
        }
        Ok(Self::from_value(value))
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// The sub-section stored under `key`. Fails if it is missing or not an object.
    pub fn sub(&self, key: &str) -> eyre::Result<Settings> {
        match self.value(key) {
            Some(value @ Value::Object(_)) => Ok(Settings {
                path: self.key_path(key),
                value: value.clone(),
            }),
            Some(_) => Err(DiscretizationError::config(self.key_path(key), "expected a nested section").into()),
            None => Err(DiscretizationError::config(self.key_path(key), "required section is missing").into()),
        }
    }

    /// The sub-section stored under `key`, or an empty section if absent.
    pub fn sub_or_empty(&self, key: &str) -> eyre::Result<Settings> {
        if self.has_key(key) {
            self.sub(key)
        } else {
            Ok(Settings {
                path: self.key_path(key),
                value: Value::Object(Default::default()),
            })
        }
    }

    /// The keys of this section, in the order stored by `serde_json` (sorted).
    pub fn keys(&self) -> Vec<String> {
        match &self.value {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

impl ConfigReader for Settings {
    fn value(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    fn section_path(&self) -> &str {
        &self.path
    }
}

fn value_as_count(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).ok();
    }
    // Counts are frequently written as floats in settings files, e.g. `2.`
    value
        .as_f64()
        .filter(|x| *x >= 0.0 && x.fract() == 0.0)
        .map(|x| x as usize)
}

/// Reads a per-axis count, given either as a single number or as a list.
pub fn read_per_axis_counts(config: &impl ConfigReader, key: &str) -> eyre::Result<Option<Vec<usize>>> {
    let malformed = || DiscretizationError::config(config.key_path(key), "expected a non-negative integer or a list of them");
    match config.value(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(entries)) => {
            let counts = entries
                .iter()
                .map(value_as_count)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(malformed)?;
            Ok(Some(counts))
        }
        Some(value) => Ok(Some(vec![value_as_count(value).ok_or_else(malformed)?])),
    }
}

/// Reads a per-axis real value, given either as a single number or as a list.
pub fn read_per_axis_reals(config: &impl ConfigReader, key: &str) -> eyre::Result<Option<Vec<f64>>> {
    let malformed = || DiscretizationError::config(config.key_path(key), "expected a number or a list of numbers");
    match config.value(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(entries)) => {
            let values = entries
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(malformed)?;
            Ok(Some(values))
        }
        Some(value) => Ok(Some(vec![value.as_f64().ok_or_else(malformed)?])),
    }
}

/// Reads a Dirichlet constraint map `global dof -> prescribed value`.
///
/// Two layouts are accepted: an object whose keys are dof numbers (`{"0": 1.0, "5": 0.0}`), or
/// a list indexed by dof in which `null` marks an unconstrained dof.
pub fn read_dirichlet_boundary_conditions(
    config: &impl ConfigReader,
    key: &str,
) -> eyre::Result<BTreeMap<usize, f64>> {
    let key_path = config.key_path(key);
    let mut constraints = BTreeMap::new();
    match config.value(key) {
        None | Some(Value::Null) => {}
        Some(Value::Object(entries)) => {
            for (dof, value) in entries {
                let dof_no: usize = dof.trim().parse().map_err(|_| {
                    DiscretizationError::config(&key_path, format!("`{dof}` is not a valid dof number"))
                })?;
                let value = value.as_f64().ok_or_else(|| {
                    DiscretizationError::config(&key_path, format!("value for dof {dof_no} is not a number"))
                })?;
                constraints.insert(dof_no, value);
            }
        }
        Some(Value::Array(entries)) => {
            for (dof_no, value) in entries.iter().enumerate() {
                match value {
                    Value::Null => {}
                    value => {
                        let value = value.as_f64().ok_or_else(|| {
                            DiscretizationError::config(&key_path, format!("value for dof {dof_no} is not a number"))
                        })?;
                        constraints.insert(dof_no, value);
                    }
                }
            }
        }
        Some(_) => {
            return Err(DiscretizationError::config(key_path, "expected an object or a list of prescribed values").into())
        }
    }
    Ok(constraints)
}
