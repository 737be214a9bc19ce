//! # Request Parameters
//!
//! Merged view of route defaults, path captures, query string and parsed
//! body, later sources winning. `require` and `permit` implement the
//! strong-parameters checks, failing with `ParameterMissing` and
//! `ParameterInvalid` faults.

use crate::fault::{Fault, PARAMETER_INVALID, PARAMETER_MISSING};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Parameter bag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Map<String, Value>,
    permitted: bool,
}

impl Params {
    /// Empty bag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bag over an existing object
    #[must_use]
    pub const fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values,
            permitted: false,
        }
    }

    /// Value for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value for a key
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Whether a key is present
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge an object over this bag
    pub fn merge(&mut self, values: Map<String, Value>) {
        self.values.extend(values);
    }

    /// Merge string pairs (query parameters) over this bag
    pub fn merge_strings(&mut self, pairs: &HashMap<String, String>) {
        self.values.extend(
            pairs
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone()))),
        );
    }

    /// Nested object under `key`
    ///
    /// # Errors
    ///
    /// Returns a `ParameterMissing` fault when the key is absent or does not
    /// hold an object.
    pub fn require(&self, key: &str) -> Result<Self, Fault> {
        match self.values.get(key) {
            Some(Value::Object(nested)) => Ok(Self::from_map(nested.clone())),
            _ => Err(Fault::new(&PARAMETER_MISSING, format!("Missing parameter `{key}`"))),
        }
    }

    /// Check that only `keys` are present and mark the bag permitted
    ///
    /// # Errors
    ///
    /// Returns a `ParameterInvalid` fault listing the unexpected keys.
    pub fn permit(mut self, keys: &[&str]) -> Result<Self, Fault> {
        let unexpected: Vec<&str> = self
            .values
            .keys()
            .map(String::as_str)
            .filter(|key| !keys.contains(key))
            .collect();
        if !unexpected.is_empty() {
            return Err(Fault::new(
                &PARAMETER_INVALID,
                format!("Unpermitted parameters: {}", unexpected.join(", ")),
            ));
        }
        self.permitted = true;
        Ok(self)
    }

    /// Whether `permit` accepted this bag
    #[must_use]
    pub const fn is_permitted(&self) -> bool {
        self.permitted
    }

    /// Deserialize a value into a typed structure
    ///
    /// # Errors
    ///
    /// Returns a `ParameterMissing` fault when the key is absent and a
    /// `RuntimeError` fault when it does not deserialize.
    pub fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<T, Fault> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| Fault::new(&PARAMETER_MISSING, format!("Missing parameter `{key}`")))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Underlying object
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Consume into an object value
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}
