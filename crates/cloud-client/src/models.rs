//! Cloud provider API models
//!
//! These models match the provider's REST representations (OpenStack-style
//! networking, compute, block storage, image and load-balancer APIs).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// Network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Network can host floating IPs and router gateways
    #[serde(rename = "router:external", default)]
    pub external: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_security_enabled: Option<bool>,
    /// Subnet IDs
    #[serde(default)]
    pub subnets: Vec<String>,
}

/// Request to create a network
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub admin_state_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_security_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Subnet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Subnet allocation pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AllocationPool {
    pub start: String,
    pub end: String,
}

/// Request to create a subnet
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateSubnetRequest {
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    pub ip_version: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns_nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allocation_pools: Vec<AllocationPool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Fixed IP on a port or router gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FixedIp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Router external gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExternalGateway {
    pub network_id: String,
    #[serde(default)]
    pub external_fixed_ips: Vec<FixedIp>,
}

/// Router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Router {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_gateway_info: Option<ExternalGateway>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Router {
    /// Addresses of the external gateway
    pub fn gateway_ips(&self) -> Vec<String> {
        self.external_gateway_info
            .as_ref()
            .map(|gw| {
                gw.external_fixed_ips
                    .iter()
                    .filter_map(|ip| ip.ip_address.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Request to create a router
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateRouterRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_gateway_info: Option<ExternalGateway>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_owner: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    /// Security group IDs
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Request to create a port
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreatePortRequest {
    pub name: String,
    pub network_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(rename = "security_groups", skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
}

/// Trunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Trunk {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub port_id: String,
}

/// Request to create a trunk
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateTrunkRequest {
    pub name: String,
    pub port_id: String,
}

/// Floating IP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    pub floating_network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_ip_address: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Request to create a floating IP
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateFloatingIpRequest {
    pub floating_network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floating_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Security group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SecurityGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "security_group_rules", default)]
    pub rules: Vec<SecurityGroupRule>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Security group rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SecurityGroupRule {
    pub id: String,
    pub security_group_id: String,
    #[serde(default)]
    pub description: String,
    pub direction: String,
    #[serde(rename = "ethertype", default, skip_serializing_if = "Option::is_none")]
    pub ether_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,
}

/// Request to create a security group rule
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq, Hash)]
pub struct CreateSecurityGroupRuleRequest {
    pub security_group_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub direction: String,
    #[serde(rename = "ethertype", skip_serializing_if = "Option::is_none")]
    pub ether_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,
}

/// Taggable networking resource collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaggedResource {
    Network,
    Subnet,
    Router,
    Port,
    FloatingIp,
    SecurityGroup,
    Trunk,
}

impl TaggedResource {
    /// Collection path segment
    pub fn collection(self) -> &'static str {
        match self {
            TaggedResource::Network => "networks",
            TaggedResource::Subnet => "subnets",
            TaggedResource::Router => "routers",
            TaggedResource::Port => "ports",
            TaggedResource::FloatingIp => "floatingips",
            TaggedResource::SecurityGroup => "security-groups",
            TaggedResource::Trunk => "trunks",
        }
    }
}

// ---------------------------------------------------------------------------
// Compute, image and block storage
// ---------------------------------------------------------------------------

/// Address of an instance on one network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InstanceAddress {
    pub addr: String,
    /// `fixed` or `floating`
    #[serde(rename = "OS-EXT-IPS:type", default, skip_serializing_if = "Option::is_none")]
    pub ip_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
}

/// Compute instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Provider status string (BUILD, ACTIVE, ERROR, ...)
    #[serde(default)]
    pub status: String,
    /// Addresses keyed by network name
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<InstanceAddress>>,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Block device mapping for instance creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BlockDeviceMapping {
    pub uuid: String,
    pub source_type: String,
    pub destination_type: String,
    pub boot_index: i32,
    pub delete_on_termination: bool,
}

impl BlockDeviceMapping {
    /// Attach an existing volume
    pub fn volume(volume_id: &str, boot_index: i32) -> Self {
        Self {
            uuid: volume_id.to_string(),
            source_type: "volume".to_string(),
            destination_type: "volume".to_string(),
            boot_index,
            delete_on_termination: false,
        }
    }
}

/// Request to create an instance
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateInstanceRequest {
    pub name: String,
    /// Image to boot from; empty when booting from volume
    #[serde(rename = "imageRef", skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(rename = "flavorRef")]
    pub flavor_id: String,
    /// Port IDs, attached in order
    #[serde(skip)]
    pub port_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Raw user data; encoded on the wire
    #[serde(skip)]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(rename = "block_device_mapping_v2", skip_serializing_if = "Vec::is_empty")]
    pub block_devices: Vec<BlockDeviceMapping>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Availability zone
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AvailabilityZone {
    pub name: String,
    pub available: bool,
}

/// Image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Flavor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Flavor {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Block storage volume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Size in GiB
    pub size: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// Request to create a volume
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    /// Populate from this image (boot volumes)
    #[serde(rename = "imageRef", skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

// ---------------------------------------------------------------------------
// Load balancer
// ---------------------------------------------------------------------------

/// Load balancer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LoadBalancer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vip_address: String,
    #[serde(default)]
    pub vip_port_id: String,
    #[serde(default)]
    pub vip_subnet_id: String,
    /// ACTIVE, PENDING_CREATE, PENDING_UPDATE, ERROR, ...
    #[serde(default)]
    pub provisioning_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl LoadBalancer {
    /// Ready for configuration changes
    pub fn is_active(&self) -> bool {
        self.provisioning_status.eq_ignore_ascii_case("ACTIVE")
    }
}

/// Request to create a load balancer
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub vip_subnet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Listener {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub protocol_port: u16,
    #[serde(default)]
    pub loadbalancer_id: String,
    #[serde(default)]
    pub allowed_cidrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pool_id: Option<String>,
}

/// Request to create a listener
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateListenerRequest {
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: String,
    pub protocol_port: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidrs: Vec<String>,
}

/// Load balancer pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LbPool {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub listener_id: String,
    #[serde(default)]
    pub loadbalancer_id: String,
}

/// Request to create a load balancer pool
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateLbPoolRequest {
    pub name: String,
    pub listener_id: String,
    pub protocol: String,
    pub lb_algorithm: String,
}

/// Health monitor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Monitor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pool_id: String,
}

/// Request to create a health monitor
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateMonitorRequest {
    pub name: String,
    pub pool_id: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub delay: u32,
    pub timeout: u32,
    pub max_retries: u32,
}

/// Pool member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub address: String,
    pub protocol_port: u16,
}

/// Request to create a pool member
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateMemberRequest {
    pub name: String,
    pub address: String,
    pub protocol_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
}
