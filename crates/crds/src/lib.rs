//! Cloudforge CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Cloudforge infrastructure controller.

pub mod cloud_cluster;
pub mod cloud_machine;
pub mod cloud_server;
pub mod conditions;
pub mod floating_ip_pool;
pub mod ip_address;
pub mod references;

pub use cloud_cluster::*;
pub use cloud_machine::*;
pub use cloud_server::*;
pub use conditions::{Condition, ConditionSeverity, ConditionStatus};
pub use floating_ip_pool::*;
pub use ip_address::*;
pub use references::*;

/// API group of infrastructure kinds
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cloudforge.io";

/// API group of IPAM kinds
pub const IPAM_GROUP: &str = "ipam.cloudforge.io";

/// Label naming the owning cluster
pub const CLUSTER_NAME_LABEL: &str = "cloudforge.io/cluster-name";

/// Label marking control-plane machines
pub const CONTROL_PLANE_LABEL: &str = "cloudforge.io/control-plane";

/// Finalizer on `CloudCluster`
pub const CLUSTER_FINALIZER: &str = "cloudcluster.infrastructure.cloudforge.io";

/// Finalizer on `CloudServer`
pub const SERVER_FINALIZER: &str = "cloudserver.infrastructure.cloudforge.io";

/// Finalizer on `CloudMachine`
pub const MACHINE_FINALIZER: &str = "cloudmachine.infrastructure.cloudforge.io";

/// Finalizer on `FloatingIPPool`
pub const POOL_FINALIZER: &str = "floatingippool.infrastructure.cloudforge.io";

/// Finalizer on `IPAddress`, cleared before the floating IP is released
pub const IP_CLAIM_FINALIZER: &str = "ipam.cloudforge.io/ip-claim-protection";

/// Prefix of machine provider IDs
pub const PROVIDER_ID_PREFIX: &str = "cloudforge:///";
