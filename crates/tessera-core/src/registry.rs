//! Operator registry: kind name -> factory.

use crate::attributes::Attributes;
use crate::operator::Operator;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds an operator instance from its attribute map, validating the
/// attributes into the operator's typed configuration.
pub type OperatorFactory = dyn Fn(&Attributes) -> Result<Arc<dyn Operator>> + Send + Sync;

/// Registry of operator factories.
///
/// Maps operator kind names (e.g., "Gelu", "Add") to the factory that
/// constructs them. New kinds are added by registering a factory; nothing
/// else in the compiler needs to change.
///
/// # Example
///
/// ```ignore
/// let mut registry = OperatorRegistry::new();
/// registry.register("Tanh", |_| Ok(Arc::new(UnaryOp::tanh())));
///
/// let op = registry.create("Tanh", &Attributes::new())?;
/// ```
#[derive(Default)]
pub struct OperatorRegistry {
    /// Map from kind name to factory.
    factories: HashMap<String, Box<OperatorFactory>>,
}

impl OperatorRegistry {
    /// Create a new empty operator registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `kind`, replacing any previous one.
    ///
    /// Returns `self` for method chaining.
    pub fn register<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(&Attributes) -> Result<Arc<dyn Operator>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
        self
    }

    /// Construct an operator of `kind` from `attributes`.
    ///
    /// # Errors
    ///
    /// Returns `Error::GraphConstruction` for an unknown kind, or whatever the
    /// factory reports for invalid attributes.
    pub fn create(&self, kind: &str, attributes: &Attributes) -> Result<Arc<dyn Operator>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            Error::GraphConstruction(format!("no operator registered for kind '{kind}'"))
        })?;
        factory(attributes)
    }

    /// Check if a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Get the number of registered kinds.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
