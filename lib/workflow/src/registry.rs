//! Node type registry (C2).
//!
//! The registry maps a node *type name* (e.g. `"http_request"`) to the
//! configuration-bag factory and schemas that describe it. It is populated
//! once at process start and is read-mostly afterwards: `build` performs no
//! I/O and always produces an equivalent node instance for the same bag.

use crate::node::{Node, NodeConfig};
use crate::port::PortSchema;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A factory that turns a configuration bag into a concrete [`NodeConfig`].
///
/// Must be pure: the same bag always produces an equivalent config, and the
/// factory performs no I/O. This is what lets `build` run at workflow
/// admission time without touching the network or filesystem.
pub type NodeFactory = Arc<dyn Fn(&JsonValue) -> Result<NodeConfig, RegistryError> + Send + Sync>;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A type name was registered twice.
    Duplicate { type_name: String },
    /// `build` or `describe` referenced a type name that was never registered.
    UnknownType { type_name: String },
    /// The configuration bag failed validation against the type's input schema.
    InvalidConfig { type_name: String, reason: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { type_name } => {
                write!(f, "node type '{type_name}' is already registered")
            }
            Self::UnknownType { type_name } => {
                write!(f, "unknown node type '{type_name}'")
            }
            Self::InvalidConfig { type_name, reason } => {
                write!(f, "invalid config for node type '{type_name}': {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

impl RegistryError {
    /// Classifies this error per §7. Every registry failure happens at
    /// admission time, so all variants classify as `admission-invalid`.
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::AdmissionInvalid
    }
}

/// Descriptive metadata attached to a registered node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTypeMetadata {
    /// Free-form category label (e.g. `"http"`, `"database"`).
    pub category: String,
    /// Semantic version of this node type's contract.
    pub version: String,
    /// Human-readable summary, shown in admission errors and tooling.
    pub description: Option<String>,
}

impl NodeTypeMetadata {
    /// Creates metadata with an empty description.
    #[must_use]
    pub fn new(category: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            version: version.into(),
            description: None,
        }
    }

    /// Attaches a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Everything the registry knows about one node type.
///
/// Note: the factory itself is intentionally excluded from this struct so
/// that `describe` can return an owned, cloneable snapshot without requiring
/// the factory closure to be `Clone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTypeDescriptor {
    /// The registered type name.
    pub type_name: String,
    /// Schema the configuration bag's `input` port must satisfy.
    pub input_schema: PortSchema,
    /// Schema the node's `output` port produces.
    pub output_schema: PortSchema,
    /// Category/version/description metadata.
    pub metadata: NodeTypeMetadata,
}

struct RegisteredType {
    descriptor: NodeTypeDescriptor,
    factory: NodeFactory,
}

/// Central registry of node types, keyed by type name.
///
/// Concurrency: intended usage is register everything once at startup, then
/// share via `Arc<NodeRegistry>` across worker threads for read-only lookups.
#[derive(Default)]
pub struct NodeRegistry {
    types: HashMap<String, RegisteredType>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registers a node type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `type_name` is already registered.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        factory: NodeFactory,
        input_schema: PortSchema,
        output_schema: PortSchema,
        metadata: NodeTypeMetadata,
    ) -> Result<(), RegistryError> {
        let type_name = type_name.into();
        if self.types.contains_key(&type_name) {
            return Err(RegistryError::Duplicate { type_name });
        }
        self.types.insert(
            type_name.clone(),
            RegisteredType {
                descriptor: NodeTypeDescriptor {
                    type_name,
                    input_schema,
                    output_schema,
                    metadata,
                },
                factory,
            },
        );
        Ok(())
    }

    /// Returns the schema and metadata for a registered type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] if `type_name` was never registered.
    pub fn describe(&self, type_name: &str) -> Result<&NodeTypeDescriptor, RegistryError> {
        self.types
            .get(type_name)
            .map(|registered| &registered.descriptor)
            .ok_or_else(|| RegistryError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    /// Checks that a configuration bag satisfies a type's input schema.
    ///
    /// Used at workflow-admission time, before a run is ever scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] or [`RegistryError::InvalidConfig`].
    pub fn validate(&self, type_name: &str, config_bag: &JsonValue) -> Result<(), RegistryError> {
        let descriptor = self.describe(type_name)?;
        if descriptor.input_schema.matches_value(config_bag) {
            Ok(())
        } else {
            Err(RegistryError::InvalidConfig {
                type_name: type_name.to_string(),
                reason: "configuration bag does not match the type's input schema".to_string(),
            })
        }
    }

    /// Builds a node instance of the given type from a configuration bag.
    ///
    /// `build` is pure: it runs the type's factory and never performs I/O.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] if `type_name` is unregistered, or
    /// [`RegistryError::InvalidConfig`] if the bag fails validation or the
    /// factory itself rejects it.
    pub fn build(
        &self,
        type_name: &str,
        name: impl Into<String>,
        config_bag: &JsonValue,
    ) -> Result<Node, RegistryError> {
        self.validate(type_name, config_bag)?;
        let registered = self.types.get(type_name).ok_or_else(|| RegistryError::UnknownType {
            type_name: type_name.to_string(),
        })?;
        let config = (registered.factory)(config_bag)?;
        Ok(Node::new(name, config).with_type(type_name.to_string()))
    }

    /// Lists all registered type names.
    #[must_use]
    pub fn known_types(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }
}
