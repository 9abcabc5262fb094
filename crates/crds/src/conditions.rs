//! Status conditions
//!
//! Every reconciled kind carries a `conditions` list. Conditions are the only
//! externally observable error channel: a human-readable message plus a short
//! machine-readable reason code.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition types
pub mod types {
    /// Summary readiness of the resource
    pub const READY: &str = "Ready";
    /// Cluster network topology resolved or created
    pub const NETWORK_READY: &str = "NetworkReady";
    /// Managed security groups converged
    pub const SECURITY_GROUPS_READY: &str = "SecurityGroupsReady";
    /// API server load balancer converged
    pub const API_ENDPOINT_READY: &str = "APIEndpointReady";
    /// Bastion host converged
    pub const BASTION_READY: &str = "BastionReady";
    /// Compute instance is ACTIVE
    pub const INSTANCE_READY: &str = "InstanceReady";
    /// Floating IP from pool is available and associated
    pub const FLOATING_ADDRESS_READY: &str = "FloatingAddressFromPoolReady";
}

/// Reason codes
pub mod reasons {
    /// Invalid input detected before any provider call
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";
    /// Network/subnet/router reconciliation failed
    pub const NETWORK_ERROR: &str = "NetworkError";
    /// Security group reconciliation failed
    pub const SECURITY_GROUP_ERROR: &str = "SecurityGroupError";
    /// Load balancer reconciliation failed
    pub const LOAD_BALANCER_ERROR: &str = "LoadBalancerError";
    /// Load balancer still provisioning
    pub const LOAD_BALANCER_PROVISIONING: &str = "LoadBalancerProvisioning";
    /// No endpoint could be derived
    pub const ENDPOINT_ERROR: &str = "ControlPlaneEndpointError";
    /// Floating IP operation failed
    pub const FLOATING_IP_ERROR: &str = "FloatingIPError";
    /// Bastion reconciliation failed
    pub const BASTION_ERROR: &str = "BastionError";
    /// Bastion is being created or replaced
    pub const BASTION_PROVISIONING: &str = "BastionProvisioning";
    /// Resource is being deleted
    pub const DELETING: &str = "Deleting";
    /// Instance creation failed
    pub const INSTANCE_CREATE_FAILED: &str = "InstanceCreateFailed";
    /// Instance entered the ERROR state
    pub const INSTANCE_STATE_ERROR: &str = "InstanceStateError";
    /// Instance was deleted outside the controller
    pub const INSTANCE_DELETED: &str = "InstanceDeleted";
    /// Instance is in a transitional state (migrating, shutoff, ...)
    pub const INSTANCE_NOT_READY: &str = "InstanceNotReady";
    /// Instance still building
    pub const INSTANCE_BUILDING: &str = "InstanceBuilding";
    /// Symbolic references could not be resolved
    pub const RESOLVE_FAILED: &str = "DependencyResolutionFailed";
    /// Port creation failed
    pub const PORT_CREATE_FAILED: &str = "PortCreateFailed";
    /// Volume creation failed
    pub const VOLUME_CREATE_FAILED: &str = "VolumeCreateFailed";
    /// Waiting for an IPAddress to fulfil a claim
    pub const WAITING_FOR_IP_ADDRESS: &str = "WaitingForIPAddress";
    /// Pool reached its configured maximum
    pub const MAX_IPS_REACHED: &str = "MaxIPsReached";
    /// Pool could not resolve its network
    pub const UNABLE_TO_FIND_NETWORK: &str = "UnableToFindNetwork";
    /// Waiting for the owning cluster infrastructure
    pub const WAITING_FOR_CLUSTER: &str = "WaitingForClusterInfrastructure";
    /// Waiting for bootstrap data
    pub const WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";
    /// Waiting for the backing CloudServer
    pub const WAITING_FOR_SERVER: &str = "WaitingForServer";
}

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet known
    #[default]
    Unknown,
}

/// Condition severity, only meaningful when status is False
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionSeverity {
    /// Unset
    #[default]
    #[serde(rename = "")]
    None,
    /// Requires user action
    Error,
    /// Degraded but progressing
    Warning,
    /// Informational
    Info,
}

/// A status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, InstanceReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Severity when status is False
    #[serde(default)]
    pub severity: ConditionSeverity,

    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A True condition
    pub fn true_(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: ConditionSeverity::None,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// A False condition
    pub fn false_(
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// An Unknown condition
    pub fn unknown(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::Unknown,
            severity: ConditionSeverity::None,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    fn same_state(&self, other: &Condition) -> bool {
        self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace a condition by type.
///
/// An unchanged condition is left untouched, including its transition time,
/// so repeated passes produce identical status.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_state(&condition) => {}
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True if the condition exists and has status True
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// True if the condition exists and has status False
pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::False)
}
