use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque payload carried by a flow run: its final result on success, or a
/// resolved configuration object.
///
/// This is a wrapper around a JSON value with helper methods for the few
/// conversions the runtime needs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    /// The inner JSON value
    pub value: serde_json::Value,
}

impl Payload {
    /// Create a new payload from a JSON value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Create a null payload
    #[inline]
    pub fn null() -> Self {
        Self {
            value: serde_json::Value::Null,
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Check if the payload is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Try to view the payload as a string
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Try to deserialize the payload into a concrete type
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create a payload from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Create a payload from a string
    #[inline]
    pub fn from_string(s: &str) -> Self {
        Self::new(serde_json::Value::String(s.to_string()))
    }
}

/// Parameters passed to a flow run: a flat mapping of string keys to JSON
/// values (scalars or string lists by convention; richer schemas are a
/// collaborator's concern).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Parameters(pub HashMap<String, serde_json::Value>);

impl Parameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Insert a parameter, replacing any existing value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Look up a parameter by key
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the parameter set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge these parameters over the given defaults. Explicit values win
    /// on key collision.
    pub fn merged_over(&self, defaults: &Parameters) -> Parameters {
        let mut merged = defaults.0.clone();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        Parameters(merged)
    }

    /// Build a parameter set from key/value pairs
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
