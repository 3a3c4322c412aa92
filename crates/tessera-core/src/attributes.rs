//! String-keyed attribute maps handed to operator factories.
//!
//! Factories parse these into typed configuration structs once, at
//! construction time. Unknown keys are ignored; missing keys fall back to the
//! documented defaults of each operator kind.

use crate::{Error, Result};
use std::collections::HashMap;

/// Attribute value types.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Float(f32),
    Int(i64),
    String(String),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl AttributeValue {
    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Float(_) => "float",
            AttributeValue::Int(_) => "int",
            AttributeValue::String(_) => "string",
            AttributeValue::Floats(_) => "float array",
            AttributeValue::Ints(_) => "int array",
            AttributeValue::Strings(_) => "string array",
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::Ints(value)
    }
}

impl From<Vec<f32>> for AttributeValue {
    fn from(value: Vec<f32>) -> Self {
        AttributeValue::Floats(value)
    }
}

impl TryFrom<&AttributeValue> for f32 {
    type Error = String;

    fn try_from(value: &AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Float(v) => Ok(*v),
            AttributeValue::Int(v) => Ok(*v as f32),
            _ => Err("Not a float".to_string()),
        }
    }
}

impl TryFrom<&AttributeValue> for i64 {
    type Error = String;

    fn try_from(value: &AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Int(v) => Ok(*v),
            _ => Err("Not an int".to_string()),
        }
    }
}

impl TryFrom<&AttributeValue> for bool {
    type Error = String;

    fn try_from(value: &AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Bool(v) => Ok(*v),
            _ => Err("Not a bool".to_string()),
        }
    }
}

impl TryFrom<&AttributeValue> for Vec<i64> {
    type Error = String;

    fn try_from(value: &AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Ints(v) => Ok(v.clone()),
            _ => Err("Not an int array".to_string()),
        }
    }
}

// ──────────────────────────────── Attributes ─────────────────────────────

/// Attribute map of one operator instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: HashMap<String, AttributeValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    ///
    /// ```
    /// use tessera_core::Attributes;
    ///
    /// let attrs = Attributes::new().with("approximate", "tanh");
    /// assert!(attrs.contains("approximate"));
    /// ```
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Typed lookup with a default for a missing key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Attribute` if the key is present with the wrong type.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: for<'a> TryFrom<&'a AttributeValue, Error = String>,
    {
        match self.values.get(key) {
            None => Ok(default),
            Some(value) => T::try_from(value).map_err(|e| {
                Error::Attribute(format!(
                    "attribute '{key}' has type {}: {e}",
                    value.type_name()
                ))
            }),
        }
    }

    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32> {
        self.get_or(key, default)
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64> {
        self.get_or(key, default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        self.get_or(key, default)
    }

    pub fn ints_or(&self, key: &str, default: &[i64]) -> Result<Vec<i64>> {
        self.get_or(key, default.to_vec())
    }
}

impl<K: Into<String>> FromIterator<(K, AttributeValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, AttributeValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
