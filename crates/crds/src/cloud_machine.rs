//! CloudMachine CRD
//!
//! A cluster node. Owns exactly one `CloudServer` of the same name and projects
//! its state back.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cloud_server::{InstanceState, NodeAddress, ServerTemplate};
use crate::conditions::Condition;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cloudforge.io",
    version = "v1alpha1",
    kind = "CloudMachine",
    namespaced,
    status = "CloudMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CloudMachineSpec {
    /// Server template
    #[serde(default)]
    pub template: ServerTemplate,

    /// Secret holding bootstrap data under key `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_data_secret: Option<String>,

    /// Failure domain (availability zone) to place the machine in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    /// Provider ID, informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudMachineStatus {
    /// Machine is ready
    #[serde(default)]
    pub ready: bool,

    /// `cloudforge:///<instanceId>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Instance state of the backing server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub instance_state: Option<InstanceState>,

    /// Addresses of the backing server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,

    /// Availability zone the machine landed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

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

/// Provider ID for an instance
pub fn provider_id(instance_id: &str) -> String {
    format!("{}{instance_id}", crate::PROVIDER_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_format() {
        assert_eq!(provider_id("abc-123"), "cloudforge:///abc-123");
    }
}
