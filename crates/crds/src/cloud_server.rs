//! CloudServer CRD
//!
//! A single compute instance with its ports, trunks and volumes. Created directly
//! by the machine reconciler (one per machine) and by the cluster reconciler (bastion).

use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::references::{ImageParam, NetworkParam, ObjectReference, SecurityGroupParam, SubnetParam};

/// Server template shared by `CloudServer`, `CloudMachine` and the cluster bastion.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerTemplate {
    /// Boot image
    #[serde(default)]
    pub image: ImageParam,

    /// Flavor name
    #[serde(default)]
    pub flavor: String,

    /// Ports to attach. When empty a single port on the cluster network is created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortOpts>,

    /// Security groups applied to every port that does not set its own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<SecurityGroupParam>,

    /// SSH key pair name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// Create a trunk for every port unless the port overrides it
    #[serde(default)]
    pub trunk: bool,

    /// Tags applied to the instance and its ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Instance metadata key/value pairs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub server_metadata: BTreeMap<String, String>,

    /// Attach a config drive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<bool>,

    /// Boot from a volume of this size instead of the image on local disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolume>,

    /// Extra data volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_block_devices: Vec<AdditionalBlockDevice>,

    /// Availability zone for the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Allocate a floating IP for the first port from this pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip_pool_ref: Option<ObjectReference>,
}

/// Port request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortOpts {
    /// Network of the port (defaults to the cluster network)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkParam>,

    /// Port description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name suffix; the port is named `<server>-<suffix>` (index when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,

    /// Fixed IPs requested on the port
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<FixedIp>,

    /// Security groups for this port only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<SecurityGroupParam>,

    /// Trunk override for this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk: Option<bool>,
}

/// Fixed IP request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FixedIp {
    /// Subnet to allocate from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<SubnetParam>,

    /// Specific address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Root volume request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootVolume {
    /// Size in GiB
    #[serde(rename = "sizeGiB")]
    pub size_gib: u32,

    /// Volume type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,

    /// Volume availability zone (defaults to the instance zone)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// Additional data volume
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalBlockDevice {
    /// Device name; the volume is named `<server>-<name>`
    pub name: String,

    /// Size in GiB
    #[serde(rename = "sizeGiB")]
    pub size_gib: u32,

    /// Volume type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,

    /// Volume availability zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cloudforge.io",
    version = "v1alpha1",
    kind = "CloudServer",
    namespaced,
    status = "CloudServerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CloudServerSpec {
    /// Server template
    #[serde(flatten)]
    pub template: ServerTemplate,

    /// Secret holding user data under key `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_ref: Option<String>,

    /// Default network for ports that name none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<NetworkParam>,
}

/// Compute instance state as reported by the provider.
///
/// Serialized as the provider's upper-case status string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "String", from = "String")]
pub enum InstanceState {
    /// No status reported yet
    #[default]
    Undefined,
    /// Instance is building
    Build,
    /// Instance is running
    Active,
    /// Instance failed
    Error,
    /// Instance was deleted
    Deleted,
    /// Any other provider state (SHUTOFF, MIGRATING, ...)
    Other(String),
}

impl InstanceState {
    /// Map a provider status string, case-insensitively
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "" | "UNDEFINED" => InstanceState::Undefined,
            "BUILD" => InstanceState::Build,
            "ACTIVE" => InstanceState::Active,
            "ERROR" => InstanceState::Error,
            "DELETED" => InstanceState::Deleted,
            other => InstanceState::Other(other.to_string()),
        }
    }

    /// Provider representation
    pub fn as_str(&self) -> &str {
        match self {
            InstanceState::Undefined => "",
            InstanceState::Build => "BUILD",
            InstanceState::Active => "ACTIVE",
            InstanceState::Error => "ERROR",
            InstanceState::Deleted => "DELETED",
            InstanceState::Other(s) => s,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Undefined => f.write_str("UNDEFINED"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<String> for InstanceState {
    fn from(s: String) -> Self {
        InstanceState::from_provider(&s)
    }
}

impl From<InstanceState> for String {
    fn from(state: InstanceState) -> Self {
        state.as_str().to_string()
    }
}

/// Fully resolved server request, persisted once before anything is created.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedServerSpec {
    /// Image ID
    pub image_id: String,

    /// Flavor ID
    pub flavor_id: String,

    /// Ports in creation order
    #[serde(default)]
    pub ports: Vec<ResolvedPortSpec>,

    /// Volumes, root volume first when present
    #[serde(default)]
    pub volumes: Vec<ResolvedVolumeSpec>,
}

/// Resolved port
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPortSpec {
    /// Deterministic port name
    pub name: String,

    /// Network ID
    pub network_id: String,

    /// Port description
    #[serde(default)]
    pub description: String,

    /// Fixed IPs with subnet IDs resolved
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<ResolvedFixedIp>,

    /// Security group IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,

    /// Create a trunk with this port as parent
    #[serde(default)]
    pub trunk: bool,

    /// Tags applied to the port
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Resolved fixed IP
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFixedIp {
    /// Subnet ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    /// Address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Resolved volume
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVolumeSpec {
    /// Deterministic volume name
    pub name: String,

    /// Size in GiB
    #[serde(rename = "sizeGiB")]
    pub size_gib: u32,

    /// Volume type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,

    /// Availability zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Boot volume built from the image
    #[serde(default)]
    pub boot: bool,
}

/// Instance address
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddress {
    /// Address type (InternalIP, ExternalIP)
    #[serde(rename = "type")]
    pub type_: String,

    /// Address
    pub address: String,
}

/// Provider resources created for the server
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerResources {
    /// Ports, in resolved order
    #[serde(default)]
    pub ports: Vec<PortStatus>,

    /// Volumes
    #[serde(default)]
    pub volumes: Vec<VolumeStatus>,
}

/// Created port
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortStatus {
    /// Port ID
    pub id: String,

    /// Trunk ID when the port is a trunk parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_id: Option<String>,
}

/// Created volume
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    /// Volume name
    pub name: String,

    /// Volume ID
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudServerStatus {
    /// Instance is ACTIVE and fully configured
    #[serde(default)]
    pub ready: bool,

    /// Provider instance ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Last observed instance state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub instance_state: Option<InstanceState>,

    /// Instance addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,

    /// Resolved request (write-once)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedServerSpec>,

    /// Created provider resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ServerResources>,

    /// Floating IP associated from the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_mapping_is_case_insensitive() {
        assert_eq!(InstanceState::from_provider("active"), InstanceState::Active);
        assert_eq!(InstanceState::from_provider("BUILD"), InstanceState::Build);
        assert_eq!(InstanceState::from_provider(""), InstanceState::Undefined);
        assert_eq!(
            InstanceState::from_provider("shutoff"),
            InstanceState::Other("SHUTOFF".to_string())
        );
    }

    #[test]
    fn test_instance_state_serializes_as_string() {
        let json = serde_json::to_string(&InstanceState::Error).unwrap();
        assert_eq!(json, "\"ERROR\"");
        let back: InstanceState = serde_json::from_str("\"MIGRATING\"").unwrap();
        assert_eq!(back, InstanceState::Other("MIGRATING".to_string()));
    }

    #[test]
    fn test_server_spec_flattens_template() {
        let spec: CloudServerSpec = serde_json::from_value(serde_json::json!({
            "image": {"name": "ubuntu"},
            "flavor": "m1.small",
            "rootVolume": {"sizeGiB": 20},
            "userDataRef": "bootstrap"
        }))
        .unwrap();

        assert_eq!(spec.template.flavor, "m1.small");
        assert_eq!(spec.template.root_volume.map(|v| v.size_gib), Some(20));
        assert_eq!(spec.user_data_ref.as_deref(), Some("bootstrap"));
    }
}
