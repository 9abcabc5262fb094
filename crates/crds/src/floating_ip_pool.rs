//! FloatingIPPool CRD
//!
//! A bounded pool of floating IPs on one external network, handed out to
//! `IPAddressClaim`s.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::references::NetworkParam;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cloudforge.io",
    version = "v1alpha1",
    kind = "FloatingIPPool",
    namespaced,
    status = "FloatingIPPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPPoolSpec {
    /// Network the floating IPs are allocated from
    pub floating_ip_network: NetworkParam,

    /// Addresses that already exist and belong to the pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_allocated_floating_ips: Vec<String>,

    /// Maximum number of claimed addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ips: Option<u32>,

    /// What happens to released addresses
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
/// Reclaim policy for released addresses
pub enum ReclaimPolicy {
    /// Delete addresses the pool created
    #[default]
    Delete,
    /// Keep addresses in the pool
    Retain,
}

/// Resolved pool network
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PoolNetworkStatus {
    /// Network ID
    pub id: String,
    /// Network name
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPPoolStatus {
    /// Addresses ready to be claimed
    #[serde(default)]
    pub available_ips: Vec<String>,

    /// Addresses handed out
    #[serde(default)]
    pub claimed_ips: Vec<String>,

    /// Addresses that could not be found at the provider
    #[serde(default)]
    pub failed_ips: Vec<String>,

    /// Resolved network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip_network: Option<PoolNetworkStatus>,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Tag placed on every floating IP the pool creates
pub fn pool_tag(pool_name: &str) -> String {
    format!("cloudforge-fip-pool-{pool_name}")
}
