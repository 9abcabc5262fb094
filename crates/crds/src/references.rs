//! Cross-resource references and provider lookup parameters
//!
//! Two families of types live here:
//! - `ObjectReference`: a Kubernetes-style local reference (same namespace) to another CR.
//! - `*Param`: symbolic provider lookups (by id, name or tags) that the controller resolves
//!   to concrete provider IDs before any resource is created.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Local reference to another custom resource in the same namespace.
///
/// Follows the Kubernetes `TypedLocalObjectReference` pattern.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API group of the referenced resource (e.g., "infrastructure.cloudforge.io")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,

    /// Kind of the referenced resource (e.g., "FloatingIPPool")
    pub kind: String,

    /// Name of the referenced resource
    pub name: String,
}

impl ObjectReference {
    /// Reference to a `FloatingIPPool` in the infrastructure group
    pub fn floating_ip_pool(name: impl Into<String>) -> Self {
        Self {
            api_group: Some(crate::INFRASTRUCTURE_GROUP.to_string()),
            kind: "FloatingIPPool".to_string(),
            name: name.into(),
        }
    }
}

/// Reference by name only (used for claim → address links).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    /// Name of the referenced resource
    pub name: String,
}

/// Network lookup. `id` wins when set, otherwise `name` and `tags` filter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkParam {
    /// Provider network ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Network name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// All of these tags must be present on the network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl NetworkParam {
    /// Lookup by ID
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Returns true if no filter field is set
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none() && self.tags.is_empty()
    }
}

/// Subnet lookup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetParam {
    /// Provider subnet ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Subnet name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Subnet CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

/// Router lookup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouterParam {
    /// Provider router ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Router name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Image lookup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageParam {
    /// Provider image ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Security group lookup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupParam {
    /// Provider security group ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Security group name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SecurityGroupParam {
    /// Lookup by ID
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }
}
