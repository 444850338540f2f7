//! Resource model: the protectable entities that flows operate on
//!
//! A [`Resource`] is a value object identified by `(resource_type, id)`.
//! Two resources with the same key are the same resource regardless of
//! name or extra properties, so resource sets deduplicate by key.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub mod graph;

pub use graph::{build_graph, DependencyProvider, GraphBuildError, ResourceGraph};

/// Closed set of resource types the engine can orchestrate.
///
/// Plugin dispatch and dependency discovery are both keyed by this enum,
/// so a missing handler is visible at registration time instead of
/// surfacing as a stringly-typed lookup failure mid-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Tenant/project container resource
    Project,
    /// Compute instance
    Server,
    /// Block storage volume
    Volume,
    /// Machine image
    Image,
    /// Virtual network
    Network,
}

impl ResourceType {
    /// Canonical lowercase tag, also used as a parameter key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Project => "project",
            ResourceType::Server => "server",
            ResourceType::Volume => "volume",
            ResourceType::Image => "image",
            ResourceType::Network => "network",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource: `(type, id)`.
pub type ResourceKey = (ResourceType, String);

/// A protectable entity.
///
/// `extra` carries plugin-specific properties the engine never interprets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Type tag, drives plugin dispatch
    pub resource_type: ResourceType,

    /// Unique identifier within the type
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Opaque per-resource properties
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl Resource {
    /// Create a resource with an empty name and no extra properties.
    pub fn new(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource_type,
            id: id.into(),
            name: String::new(),
            extra: serde_json::Value::Null,
        }
    }

    /// Set the human-readable name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach extra properties.
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    /// The `(type, id)` identity key.
    pub fn key(&self) -> ResourceKey {
        (self.resource_type, self.id.clone())
    }

    /// Parameter-table key for this specific resource: `"<type>#<id>"`.
    pub fn parameter_key(&self) -> String {
        format!("{}#{}", self.resource_type, self.id)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource_type, self.id)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type && self.id == other.id
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_type.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for Resource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Resource {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.resource_type, &self.id).cmp(&(other.resource_type, &other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_identity_ignores_name_and_extra() {
        let a = Resource::new(ResourceType::Volume, "vol-1").with_name("data");
        let b = Resource::new(ResourceType::Volume, "vol-1")
            .with_extra(serde_json::json!({"size": 10}));

        assert_eq!(a, b);

        let mut set = BTreeSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_ordering_is_by_type_then_id() {
        let server = Resource::new(ResourceType::Server, "a");
        let volume = Resource::new(ResourceType::Volume, "a");
        let volume_b = Resource::new(ResourceType::Volume, "b");

        assert!(server < volume);
        assert!(volume < volume_b);
    }

    #[test]
    fn test_parameter_key() {
        let r = Resource::new(ResourceType::Server, "srv-1");
        assert_eq!(r.parameter_key(), "server#srv-1");
    }

    #[test]
    fn test_serde_round_trip() {
        let r = Resource::new(ResourceType::Image, "img-1")
            .with_name("base")
            .with_extra(serde_json::json!({"format": "qcow2"}));
        let json = serde_json::to_string(&r).unwrap();
        let back: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
        assert_eq!(back.name, "base");
        assert_eq!(back.extra["format"], "qcow2");
    }
}
