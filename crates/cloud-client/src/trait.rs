//! Provider service traits
//!
//! These traits abstract the provider so reconcilers can be unit-tested against
//! `MockCloudClient`. `CloudClient` implements all three; `CloudClientTrait` is
//! the umbrella bound reconcilers hold as `Box<dyn CloudClientTrait>`.
//!
//! Lookups by ID return `Ok(None)` when the resource does not exist. List calls
//! take provider query filters as `(key, value)` pairs; `tags` is a comma-separated
//! list that must all match.

use crate::error::CloudError;
use crate::models::*;

/// Networks, subnets, routers, ports, trunks, floating IPs and security groups
#[async_trait::async_trait]
pub trait NetworkingService: Send + Sync {
    async fn list_networks(&self, filters: &[(&str, &str)]) -> Result<Vec<Network>, CloudError>;
    async fn get_network(&self, id: &str) -> Result<Option<Network>, CloudError>;
    async fn create_network(&self, request: CreateNetworkRequest) -> Result<Network, CloudError>;
    async fn delete_network(&self, id: &str) -> Result<(), CloudError>;

    async fn list_subnets(&self, filters: &[(&str, &str)]) -> Result<Vec<Subnet>, CloudError>;
    async fn create_subnet(&self, request: CreateSubnetRequest) -> Result<Subnet, CloudError>;

    async fn list_routers(&self, filters: &[(&str, &str)]) -> Result<Vec<Router>, CloudError>;
    async fn create_router(&self, request: CreateRouterRequest) -> Result<Router, CloudError>;
    async fn delete_router(&self, id: &str) -> Result<(), CloudError>;
    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<(), CloudError>;
    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<(), CloudError>;

    async fn list_ports(&self, filters: &[(&str, &str)]) -> Result<Vec<Port>, CloudError>;
    async fn get_port(&self, id: &str) -> Result<Option<Port>, CloudError>;
    async fn create_port(&self, request: CreatePortRequest) -> Result<Port, CloudError>;
    async fn delete_port(&self, id: &str) -> Result<(), CloudError>;

    async fn list_trunks(&self, filters: &[(&str, &str)]) -> Result<Vec<Trunk>, CloudError>;
    async fn create_trunk(&self, request: CreateTrunkRequest) -> Result<Trunk, CloudError>;
    async fn delete_trunk(&self, id: &str) -> Result<(), CloudError>;

    async fn list_floating_ips(&self, filters: &[(&str, &str)]) -> Result<Vec<FloatingIp>, CloudError>;
    async fn get_floating_ip(&self, id: &str) -> Result<Option<FloatingIp>, CloudError>;
    async fn create_floating_ip(&self, request: CreateFloatingIpRequest) -> Result<FloatingIp, CloudError>;
    async fn delete_floating_ip(&self, id: &str) -> Result<(), CloudError>;
    async fn associate_floating_ip(&self, id: &str, port_id: &str) -> Result<FloatingIp, CloudError>;
    async fn disassociate_floating_ip(&self, id: &str) -> Result<FloatingIp, CloudError>;

    /// Add a single tag to a networking resource
    async fn add_tag(&self, resource: TaggedResource, id: &str, tag: &str) -> Result<(), CloudError>;

    async fn list_security_groups(&self, filters: &[(&str, &str)]) -> Result<Vec<SecurityGroup>, CloudError>;
    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup, CloudError>;
    async fn delete_security_group(&self, id: &str) -> Result<(), CloudError>;
    async fn create_security_group_rule(
        &self,
        request: CreateSecurityGroupRuleRequest,
    ) -> Result<SecurityGroupRule, CloudError>;
    async fn delete_security_group_rule(&self, id: &str) -> Result<(), CloudError>;

    /// First port of an instance on the given network
    async fn get_management_port(
        &self,
        instance_id: &str,
        network_id: &str,
    ) -> Result<Option<Port>, CloudError> {
        let ports = self
            .list_ports(&[("device_id", instance_id), ("network_id", network_id)])
            .await?;
        Ok(ports.into_iter().next())
    }
}

/// Instances, availability zones, images, flavors and volumes
#[async_trait::async_trait]
pub trait ComputeService: Send + Sync {
    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, CloudError>;
    async fn list_instances(&self, filters: &[(&str, &str)]) -> Result<Vec<Instance>, CloudError>;
    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<Instance, CloudError>;
    async fn delete_instance(&self, id: &str) -> Result<(), CloudError>;

    async fn list_availability_zones(&self) -> Result<Vec<AvailabilityZone>, CloudError>;

    async fn list_images(&self, filters: &[(&str, &str)]) -> Result<Vec<Image>, CloudError>;
    async fn get_image(&self, id: &str) -> Result<Option<Image>, CloudError>;
    async fn list_flavors(&self) -> Result<Vec<Flavor>, CloudError>;

    async fn list_volumes(&self, filters: &[(&str, &str)]) -> Result<Vec<Volume>, CloudError>;
    async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CloudError>;
    async fn delete_volume(&self, id: &str) -> Result<(), CloudError>;
}

/// Load balancers, listeners, pools, health monitors and members
#[async_trait::async_trait]
pub trait LoadBalancerService: Send + Sync {
    async fn list_load_balancers(&self, filters: &[(&str, &str)]) -> Result<Vec<LoadBalancer>, CloudError>;
    async fn get_load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, CloudError>;
    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer, CloudError>;
    /// Delete the load balancer and everything below it
    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError>;

    async fn list_listeners(&self, load_balancer_id: &str) -> Result<Vec<Listener>, CloudError>;
    async fn create_listener(&self, request: CreateListenerRequest) -> Result<Listener, CloudError>;
    async fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: &[String]) -> Result<Listener, CloudError>;

    async fn list_pools(&self, load_balancer_id: &str) -> Result<Vec<LbPool>, CloudError>;
    async fn create_pool(&self, request: CreateLbPoolRequest) -> Result<LbPool, CloudError>;

    async fn list_monitors(&self, pool_id: &str) -> Result<Vec<Monitor>, CloudError>;
    async fn create_monitor(&self, request: CreateMonitorRequest) -> Result<Monitor, CloudError>;

    async fn list_members(&self, pool_id: &str) -> Result<Vec<Member>, CloudError>;
    async fn create_member(&self, pool_id: &str, request: CreateMemberRequest) -> Result<Member, CloudError>;
    async fn delete_member(&self, pool_id: &str, member_id: &str) -> Result<(), CloudError>;
}

/// Everything a reconciler needs from the provider
pub trait CloudClientTrait: NetworkingService + ComputeService + LoadBalancerService {}

impl<T> CloudClientTrait for T where T: NetworkingService + ComputeService + LoadBalancerService + ?Sized {}
