//! Mock CloudClient for unit testing
//!
//! This module provides an in-memory implementation of the provider traits that
//! can be used in unit tests without a running cloud.
//!
//! The mock is organized into domain-specific modules:
//! - `networking.rs` - networks, subnets, routers, ports, trunks, floating IPs, security groups
//! - `compute.rs` - instances, availability zones, images, flavors, volumes
//! - `loadbalancer.rs` - load balancers, listeners, pools, monitors, members
//!
//! Every call is recorded (see [`MockCloudClient::calls`]) and any operation can be
//! made to fail with [`MockCloudClient::fail_on`].

mod compute;
mod loadbalancer;
mod networking;

use crate::error::CloudError;
use crate::models::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory provider state
#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub(crate) networks: Vec<Network>,
    pub(crate) subnets: Vec<Subnet>,
    pub(crate) routers: Vec<Router>,
    pub(crate) router_interfaces: BTreeSet<(String, String)>,
    pub(crate) ports: Vec<Port>,
    pub(crate) trunks: Vec<Trunk>,
    pub(crate) floating_ips: Vec<FloatingIp>,
    pub(crate) security_groups: Vec<SecurityGroup>,
    pub(crate) instances: Vec<Instance>,
    pub(crate) availability_zones: Vec<AvailabilityZone>,
    pub(crate) images: Vec<Image>,
    pub(crate) flavors: Vec<Flavor>,
    pub(crate) volumes: Vec<Volume>,
    pub(crate) load_balancers: Vec<LoadBalancer>,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) pools: Vec<LbPool>,
    pub(crate) monitors: Vec<Monitor>,
    pub(crate) members: HashMap<String, Vec<Member>>,
    pub(crate) failures: HashMap<String, String>,
    pub(crate) calls: Vec<String>,
    pub(crate) next_host: u32,
    pub(crate) new_instance_status: String,
    pub(crate) new_load_balancer_status: String,
}

/// Mock CloudClient for testing
///
/// Clones share state, so a test can keep a handle while the reconciler owns another.
#[derive(Debug, Clone)]
pub struct MockCloudClient {
    pub(crate) state: Arc<Mutex<MockState>>,
}

impl Default for MockCloudClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloudClient {
    /// Create an empty mock cloud
    pub fn new() -> Self {
        let state = MockState {
            next_host: 10,
            new_instance_status: "ACTIVE".to_string(),
            new_load_balancer_status: "ACTIVE".to_string(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Mock cloud with an external network `public`, image `ubuntu`,
    /// flavor `m1.small` and availability zone `nova`
    pub fn with_defaults() -> Self {
        let client = Self::new();
        client.add_network(Network {
            id: "public-net".to_string(),
            name: "public".to_string(),
            external: true,
            ..Default::default()
        });
        client.add_image(Image {
            id: "image-ubuntu".to_string(),
            name: "ubuntu".to_string(),
        });
        client.add_flavor(Flavor {
            id: "flavor-small".to_string(),
            name: "m1.small".to_string(),
        });
        client.add_availability_zone("nova");
        client
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and return the injected failure for `op`, if any
    pub(crate) fn enter(&self, op: &str, detail: &str) -> Result<(), CloudError> {
        let mut state = self.state();
        state.calls.push(if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        });
        match state.failures.get(op) {
            Some(message) => Err(CloudError::Api(message.clone())),
            None => Ok(()),
        }
    }

    /// Generate a provider ID
    pub(crate) fn new_id(prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4())
    }

    // ----- fault injection and inspection -----

    /// Make every call to `op` fail with an API error until cleared
    pub fn fail_on(&self, op: &str, message: &str) {
        self.state().failures.insert(op.to_string(), message.to_string());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Calls made so far, as `"<op> <detail>"`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls whose operation name is `op`
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .cloned()
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    // ----- test setup -----

    /// Add a network
    pub fn add_network(&self, network: Network) {
        self.state().networks.push(network);
    }

    /// Add a subnet and link it to its network
    pub fn add_subnet(&self, subnet: Subnet) {
        let mut state = self.state();
        if let Some(net) = state.networks.iter_mut().find(|n| n.id == subnet.network_id) {
            net.subnets.push(subnet.id.clone());
        }
        state.subnets.push(subnet);
    }

    /// Add a router
    pub fn add_router(&self, router: Router) {
        self.state().routers.push(router);
    }

    /// Add a port
    pub fn add_port(&self, port: Port) {
        self.state().ports.push(port);
    }

    /// Add a floating IP
    pub fn add_floating_ip(&self, fip: FloatingIp) {
        self.state().floating_ips.push(fip);
    }

    /// Add an instance
    pub fn add_instance(&self, instance: Instance) {
        self.state().instances.push(instance);
    }

    /// Add a volume
    pub fn add_volume(&self, volume: Volume) {
        self.state().volumes.push(volume);
    }

    /// Add an image
    pub fn add_image(&self, image: Image) {
        self.state().images.push(image);
    }

    /// Add a flavor
    pub fn add_flavor(&self, flavor: Flavor) {
        self.state().flavors.push(flavor);
    }

    /// Add an available zone
    pub fn add_availability_zone(&self, name: &str) {
        self.state().availability_zones.push(AvailabilityZone {
            name: name.to_string(),
            available: true,
        });
    }

    /// Status given to newly created instances (default ACTIVE)
    pub fn set_new_instance_status(&self, status: &str) {
        self.state().new_instance_status = status.to_string();
    }

    /// Change the status of an existing instance
    pub fn set_instance_status(&self, id: &str, status: &str) {
        if let Some(instance) = self.state().instances.iter_mut().find(|i| i.id == id) {
            instance.status = status.to_string();
        }
    }

    /// Provisioning status given to new load balancers (default ACTIVE)
    pub fn set_new_load_balancer_status(&self, status: &str) {
        self.state().new_load_balancer_status = status.to_string();
    }

    /// Change the provisioning status of an existing load balancer
    pub fn set_load_balancer_status(&self, id: &str, status: &str) {
        if let Some(lb) = self.state().load_balancers.iter_mut().find(|l| l.id == id) {
            lb.provisioning_status = status.to_string();
        }
    }

    // ----- inspection -----

    /// All networks
    pub fn networks(&self) -> Vec<Network> {
        self.state().networks.clone()
    }

    /// All subnets
    pub fn subnets(&self) -> Vec<Subnet> {
        self.state().subnets.clone()
    }

    /// All routers
    pub fn routers(&self) -> Vec<Router> {
        self.state().routers.clone()
    }

    /// All ports
    pub fn ports(&self) -> Vec<Port> {
        self.state().ports.clone()
    }

    /// All trunks
    pub fn trunks(&self) -> Vec<Trunk> {
        self.state().trunks.clone()
    }

    /// All floating IPs
    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.state().floating_ips.clone()
    }

    /// All security groups
    pub fn security_groups(&self) -> Vec<SecurityGroup> {
        self.state().security_groups.clone()
    }

    /// All instances
    pub fn instances(&self) -> Vec<Instance> {
        self.state().instances.clone()
    }

    /// All volumes
    pub fn volumes(&self) -> Vec<Volume> {
        self.state().volumes.clone()
    }

    /// All load balancers
    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.state().load_balancers.clone()
    }

    /// All listeners
    pub fn listeners(&self) -> Vec<Listener> {
        self.state().listeners.clone()
    }

    /// Members of every pool
    pub fn all_members(&self) -> Vec<Member> {
        self.state().members.values().flatten().cloned().collect()
    }
}

impl MockState {
    /// Next host address in `prefix`
    pub(crate) fn next_address(&mut self, prefix: &str) -> String {
        let host = self.next_host;
        self.next_host += 1;
        format!("{prefix}.{host}")
    }
}

/// Provider-style filter match over the serialized resource
pub(crate) fn matches<T: Serialize>(item: &T, filters: &[(&str, &str)]) -> bool {
    let Ok(value) = serde_json::to_value(item) else {
        return false;
    };
    filters.iter().all(|(key, expected)| {
        if *key == "tags" {
            let tags: Vec<&str> = value
                .get("tags")
                .and_then(serde_json::Value::as_array)
                .map(|a| a.iter().filter_map(serde_json::Value::as_str).collect())
                .unwrap_or_default();
            return expected.split(',').all(|t| tags.contains(&t));
        }
        match value.get(*key) {
            Some(serde_json::Value::String(s)) => s == expected,
            Some(serde_json::Value::Bool(b)) => b.to_string() == *expected,
            Some(serde_json::Value::Number(n)) => n.to_string() == *expected,
            _ => false,
        }
    })
}
