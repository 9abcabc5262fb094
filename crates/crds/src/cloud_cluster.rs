//! CloudCluster CRD
//!
//! Cluster-scoped infrastructure: network topology, security groups, the API-server
//! load balancer, the control-plane endpoint and an optional bastion host.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cloud_server::ServerTemplate;
use crate::conditions::Condition;
use crate::references::{NetworkParam, RouterParam, SubnetParam};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cloudforge.io",
    version = "v1alpha1",
    kind = "CloudCluster",
    namespaced,
    status = "CloudClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CloudClusterSpec {
    /// Subnets the controller creates and owns. At most one is supported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_subnets: Vec<SubnetSpec>,

    /// Pre-existing network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkParam>,

    /// Pre-existing subnets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetParam>,

    /// Pre-existing router
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterParam>,

    /// External network for router gateway and floating IPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_network: Option<NetworkParam>,

    /// Never use an external network
    #[serde(default)]
    pub disable_external_network: bool,

    /// MTU of the managed network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mtu: Option<u32>,

    /// Disable port security on the managed network
    #[serde(default)]
    pub disable_port_security: bool,

    /// Let the controller manage security groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_security_groups: Option<ManagedSecurityGroups>,

    /// API-server load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_load_balancer: Option<ApiServerLoadBalancer>,

    /// Do not allocate a floating IP for the API server
    #[serde(default)]
    pub disable_api_server_floating_ip: bool,

    /// Floating IP address to use for the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_floating_ip: Option<String>,

    /// Fixed IP address for the API server when no floating IP is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_fixed_ip: Option<String>,

    /// API server port (default 6443)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_port: Option<u16>,

    /// User-pinned control-plane endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Restrict control-plane failure domains to these zones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub control_plane_availability_zones: Vec<String>,

    /// Do not set an availability zone on control-plane machines
    #[serde(default)]
    pub control_plane_omit_availability_zone: bool,

    /// Bastion host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<Bastion>,

    /// Tags applied to every provider resource the controller creates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Default API server port
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

impl CloudClusterSpec {
    /// API server port, defaulted
    pub fn api_server_port(&self) -> u16 {
        self.api_server_port.unwrap_or(DEFAULT_API_SERVER_PORT)
    }

    /// True when an API-server load balancer is requested
    pub fn load_balancer_enabled(&self) -> bool {
        self.api_server_load_balancer.as_ref().is_some_and(|lb| lb.enabled)
    }

    /// True when a bastion is requested
    pub fn bastion_enabled(&self) -> bool {
        self.bastion.as_ref().is_some_and(|b| b.enabled)
    }
}

/// Managed subnet
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Subnet CIDR
    pub cidr: String,

    /// DNS servers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_nameservers: Vec<String>,

    /// Allocation pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocation_pools: Vec<AllocationPool>,
}

/// Subnet allocation pool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPool {
    /// First address
    pub start: String,
    /// Last address
    pub end: String,
}

/// Managed security group settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSecurityGroups {
    /// Allow all traffic between cluster nodes
    #[serde(default)]
    pub allow_all_in_cluster_traffic: bool,

    /// Extra rules applied to control-plane and worker groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_nodes_security_group_rules: Vec<SecurityGroupRuleSpec>,
}

/// Security group rule request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRuleSpec {
    /// Rule description
    #[serde(default)]
    pub description: String,

    /// ingress or egress
    #[serde(default = "default_direction")]
    pub direction: String,

    /// IPv4 or IPv6
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ether_type: Option<String>,

    /// tcp, udp, icmp, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Lower port bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,

    /// Upper port bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,

    /// Remote CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,

    /// Remote group by role (controlplane, worker, bastion)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_managed_groups: Vec<String>,
}

fn default_direction() -> String {
    "ingress".to_string()
}

/// API-server load balancer request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerLoadBalancer {
    /// Create the load balancer
    #[serde(default)]
    pub enabled: bool,

    /// Ports forwarded in addition to the API server port
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_ports: Vec<u16>,

    /// CIDRs allowed on every listener
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidrs: Vec<String>,

    /// Load balancer provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Control-plane endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
}

impl ApiEndpoint {
    /// An endpoint is set when its host is non-empty and its port non-zero
    pub fn is_set(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

/// Bastion request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bastion {
    /// Create the bastion
    #[serde(default)]
    pub enabled: bool,

    /// Server template
    #[serde(default)]
    pub spec: ServerTemplate,

    /// Floating IP address to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,

    /// Availability zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// Observed network
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Network ID
    pub id: String,
    /// Network name
    #[serde(default)]
    pub name: String,
    /// Network tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Subnets of the network used by the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetStatus>,
}

/// Observed subnet
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    /// Subnet ID
    pub id: String,
    /// Subnet name
    #[serde(default)]
    pub name: String,
    /// Subnet CIDR
    #[serde(default)]
    pub cidr: String,
}

/// Observed router
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatus {
    /// Router ID
    pub id: String,
    /// Router name
    #[serde(default)]
    pub name: String,
    /// External gateway addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
}

/// Observed load balancer
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    /// Load balancer ID
    pub id: String,
    /// Load balancer name
    #[serde(default)]
    pub name: String,
    /// Public address (floating IP) if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// VIP address
    #[serde(default)]
    pub internal_ip: String,
    /// Effective allowed CIDRs on listeners
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidrs: Vec<String>,
}

/// Observed security group
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupStatus {
    /// Group ID
    pub id: String,
    /// Group name
    #[serde(default)]
    pub name: String,
    /// Rules after convergence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<SecurityGroupRuleStatus>,
}

/// Observed security group rule
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRuleStatus {
    /// Rule ID
    pub id: String,
    /// Rule description
    #[serde(default)]
    pub description: String,
    /// ingress or egress
    #[serde(default)]
    pub direction: String,
    /// Ether type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ether_type: Option<String>,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Lower port bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    /// Upper port bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    /// Remote group ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_group_id: Option<String>,
    /// Remote CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,
}

/// Observed bastion
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BastionStatus {
    /// Instance ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// CloudServer name
    #[serde(default)]
    pub name: String,
    /// Instance state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Fixed address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Floating address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,
    /// Hash of the bastion template the server was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
}

/// Failure domain
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomain {
    /// Eligible for control-plane machines
    #[serde(default)]
    pub control_plane: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudClusterStatus {
    /// Infrastructure is ready
    #[serde(default)]
    pub ready: bool,

    /// Cluster network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkStatus>,

    /// External network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_network: Option<NetworkStatus>,

    /// Router
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterStatus>,

    /// API-server load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_load_balancer: Option<LoadBalancerStatus>,

    /// Control-plane security group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_security_group: Option<SecurityGroupStatus>,

    /// Worker security group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_security_group: Option<SecurityGroupStatus>,

    /// Bastion security group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion_security_group: Option<SecurityGroupStatus>,

    /// Bastion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionStatus>,

    /// Engine-pinned control-plane endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Floating IP the controller allocated for the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_floating_ip: Option<String>,

    /// Failure domains by availability zone
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_domains: BTreeMap<String, FailureDomain>,

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
