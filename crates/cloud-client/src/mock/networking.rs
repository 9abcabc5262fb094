//! Networking operations for MockCloudClient

use super::{MockCloudClient, matches};
use crate::error::CloudError;
use crate::models::*;
use crate::provider_trait::NetworkingService;

#[async_trait::async_trait]
impl NetworkingService for MockCloudClient {
    async fn list_networks(&self, filters: &[(&str, &str)]) -> Result<Vec<Network>, CloudError> {
        self.enter("list_networks", "")?;
        Ok(self
            .state()
            .networks
            .iter()
            .filter(|n| matches(*n, filters))
            .cloned()
            .collect())
    }

    async fn get_network(&self, id: &str) -> Result<Option<Network>, CloudError> {
        self.enter("get_network", id)?;
        Ok(self.state().networks.iter().find(|n| n.id == id).cloned())
    }

    async fn create_network(&self, request: CreateNetworkRequest) -> Result<Network, CloudError> {
        self.enter("create_network", &request.name)?;
        let network = Network {
            id: Self::new_id("net"),
            name: request.name,
            mtu: request.mtu,
            port_security_enabled: request.port_security_enabled,
            ..Default::default()
        };
        self.state().networks.push(network.clone());
        Ok(network)
    }

    async fn delete_network(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_network", id)?;
        let mut state = self.state();
        if state.ports.iter().any(|p| p.network_id == id) {
            return Err(CloudError::Conflict(format!("network {id} has ports in use")));
        }
        state.networks.retain(|n| n.id != id);
        state.subnets.retain(|s| s.network_id != id);
        Ok(())
    }

    async fn list_subnets(&self, filters: &[(&str, &str)]) -> Result<Vec<Subnet>, CloudError> {
        self.enter("list_subnets", "")?;
        Ok(self
            .state()
            .subnets
            .iter()
            .filter(|s| matches(*s, filters))
            .cloned()
            .collect())
    }

    async fn create_subnet(&self, request: CreateSubnetRequest) -> Result<Subnet, CloudError> {
        self.enter("create_subnet", &request.name)?;
        let mut state = self.state();
        let Some(network) = state.networks.iter_mut().find(|n| n.id == request.network_id) else {
            return Err(CloudError::NotFound(format!("network {}", request.network_id)));
        };
        let subnet = Subnet {
            id: Self::new_id("subnet"),
            name: request.name,
            network_id: request.network_id,
            cidr: request.cidr,
            gateway_ip: None,
            tags: Vec::new(),
        };
        network.subnets.push(subnet.id.clone());
        state.subnets.push(subnet.clone());
        Ok(subnet)
    }

    async fn list_routers(&self, filters: &[(&str, &str)]) -> Result<Vec<Router>, CloudError> {
        self.enter("list_routers", "")?;
        Ok(self
            .state()
            .routers
            .iter()
            .filter(|r| matches(*r, filters))
            .cloned()
            .collect())
    }

    async fn create_router(&self, request: CreateRouterRequest) -> Result<Router, CloudError> {
        self.enter("create_router", &request.name)?;
        let mut state = self.state();
        let gateway = request.external_gateway_info.map(|mut gw| {
            if gw.external_fixed_ips.is_empty() {
                gw.external_fixed_ips.push(FixedIp {
                    subnet_id: None,
                    ip_address: Some(state.next_address("172.24.4")),
                });
            }
            gw
        });
        let router = Router {
            id: Self::new_id("router"),
            name: request.name,
            external_gateway_info: gateway,
            tags: Vec::new(),
        };
        state.routers.push(router.clone());
        Ok(router)
    }

    async fn delete_router(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_router", id)?;
        let mut state = self.state();
        if state.router_interfaces.iter().any(|(r, _)| r == id) {
            return Err(CloudError::Conflict(format!("router {id} still has interfaces")));
        }
        state.routers.retain(|r| r.id != id);
        Ok(())
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<(), CloudError> {
        self.enter("add_router_interface", &format!("{router_id} {subnet_id}"))?;
        let mut state = self.state();
        let key = (router_id.to_string(), subnet_id.to_string());
        if state.router_interfaces.contains(&key) {
            return Err(CloudError::InvalidRequest(format!(
                "router {router_id} already has an interface on subnet {subnet_id}"
            )));
        }
        let Some(network_id) = state
            .subnets
            .iter()
            .find(|s| s.id == subnet_id)
            .map(|s| s.network_id.clone())
        else {
            return Err(CloudError::NotFound(format!("subnet {subnet_id}")));
        };
        let address = state.next_address("10.0.0");
        state.ports.push(Port {
            id: Self::new_id("port"),
            name: String::new(),
            network_id,
            device_id: router_id.to_string(),
            device_owner: "network:router_interface".to_string(),
            fixed_ips: vec![FixedIp {
                subnet_id: Some(subnet_id.to_string()),
                ip_address: Some(address),
            }],
            ..Default::default()
        });
        state.router_interfaces.insert(key);
        Ok(())
    }

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<(), CloudError> {
        self.enter("remove_router_interface", &format!("{router_id} {subnet_id}"))?;
        let mut state = self.state();
        state
            .router_interfaces
            .remove(&(router_id.to_string(), subnet_id.to_string()));
        state.ports.retain(|p| {
            !(p.device_id == router_id
                && p.fixed_ips.iter().any(|ip| ip.subnet_id.as_deref() == Some(subnet_id)))
        });
        Ok(())
    }

    async fn list_ports(&self, filters: &[(&str, &str)]) -> Result<Vec<Port>, CloudError> {
        self.enter("list_ports", "")?;
        Ok(self
            .state()
            .ports
            .iter()
            .filter(|p| matches(*p, filters))
            .cloned()
            .collect())
    }

    async fn get_port(&self, id: &str) -> Result<Option<Port>, CloudError> {
        self.enter("get_port", id)?;
        Ok(self.state().ports.iter().find(|p| p.id == id).cloned())
    }

    async fn create_port(&self, request: CreatePortRequest) -> Result<Port, CloudError> {
        self.enter("create_port", &request.name)?;
        let mut state = self.state();
        if !state.networks.iter().any(|n| n.id == request.network_id) {
            return Err(CloudError::NotFound(format!("network {}", request.network_id)));
        }
        let mut fixed_ips = request.fixed_ips;
        if fixed_ips.is_empty() {
            let subnet_id = state
                .subnets
                .iter()
                .find(|s| s.network_id == request.network_id)
                .map(|s| s.id.clone());
            fixed_ips.push(FixedIp {
                subnet_id,
                ip_address: None,
            });
        }
        for ip in &mut fixed_ips {
            if ip.ip_address.is_none() {
                ip.ip_address = Some(state.next_address("10.0.0"));
            }
        }
        let port = Port {
            id: Self::new_id("port"),
            name: request.name,
            network_id: request.network_id,
            description: request.description,
            fixed_ips,
            security_groups: request.security_group_ids,
            ..Default::default()
        };
        state.ports.push(port.clone());
        Ok(port)
    }

    async fn delete_port(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_port", id)?;
        let mut state = self.state();
        if state.trunks.iter().any(|t| t.port_id == id) {
            return Err(CloudError::Conflict(format!("port {id} is a trunk parent")));
        }
        state.ports.retain(|p| p.id != id);
        for fip in state.floating_ips.iter_mut().filter(|f| f.port_id.as_deref() == Some(id)) {
            fip.port_id = None;
            fip.fixed_ip_address = None;
        }
        Ok(())
    }

    async fn list_trunks(&self, filters: &[(&str, &str)]) -> Result<Vec<Trunk>, CloudError> {
        self.enter("list_trunks", "")?;
        Ok(self
            .state()
            .trunks
            .iter()
            .filter(|t| matches(*t, filters))
            .cloned()
            .collect())
    }

    async fn create_trunk(&self, request: CreateTrunkRequest) -> Result<Trunk, CloudError> {
        self.enter("create_trunk", &request.name)?;
        let trunk = Trunk {
            id: Self::new_id("trunk"),
            name: request.name,
            port_id: request.port_id,
        };
        self.state().trunks.push(trunk.clone());
        Ok(trunk)
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_trunk", id)?;
        self.state().trunks.retain(|t| t.id != id);
        Ok(())
    }

    async fn list_floating_ips(&self, filters: &[(&str, &str)]) -> Result<Vec<FloatingIp>, CloudError> {
        self.enter("list_floating_ips", "")?;
        Ok(self
            .state()
            .floating_ips
            .iter()
            .filter(|f| matches(*f, filters))
            .cloned()
            .collect())
    }

    async fn get_floating_ip(&self, id: &str) -> Result<Option<FloatingIp>, CloudError> {
        self.enter("get_floating_ip", id)?;
        Ok(self.state().floating_ips.iter().find(|f| f.id == id).cloned())
    }

    async fn create_floating_ip(&self, request: CreateFloatingIpRequest) -> Result<FloatingIp, CloudError> {
        let detail = request.floating_ip_address.clone().unwrap_or_default();
        self.enter("create_floating_ip", &detail)?;
        let mut state = self.state();
        if !state.networks.iter().any(|n| n.id == request.floating_network_id) {
            return Err(CloudError::NotFound(format!(
                "network {}",
                request.floating_network_id
            )));
        }
        let address = match request.floating_ip_address {
            Some(address) => {
                if state.floating_ips.iter().any(|f| f.floating_ip_address == address) {
                    return Err(CloudError::Conflict(format!("floating IP {address} already allocated")));
                }
                address
            }
            None => state.next_address("172.24.4"),
        };
        let fixed_ip_address = request.port_id.as_ref().and_then(|port_id| {
            state
                .ports
                .iter()
                .find(|p| &p.id == port_id)
                .and_then(|p| p.fixed_ips.first())
                .and_then(|ip| ip.ip_address.clone())
        });
        let fip = FloatingIp {
            id: Self::new_id("fip"),
            floating_ip_address: address,
            floating_network_id: request.floating_network_id,
            port_id: request.port_id,
            fixed_ip_address,
            description: request.description,
            tags: Vec::new(),
        };
        state.floating_ips.push(fip.clone());
        Ok(fip)
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_floating_ip", id)?;
        self.state().floating_ips.retain(|f| f.id != id);
        Ok(())
    }

    async fn associate_floating_ip(&self, id: &str, port_id: &str) -> Result<FloatingIp, CloudError> {
        self.enter("associate_floating_ip", &format!("{id} {port_id}"))?;
        let mut state = self.state();
        let Some(fixed) = state
            .ports
            .iter()
            .find(|p| p.id == port_id)
            .map(|p| p.fixed_ips.first().and_then(|ip| ip.ip_address.clone()))
        else {
            return Err(CloudError::NotFound(format!("port {port_id}")));
        };
        let Some(fip) = state.floating_ips.iter_mut().find(|f| f.id == id) else {
            return Err(CloudError::NotFound(format!("floating IP {id}")));
        };
        fip.port_id = Some(port_id.to_string());
        fip.fixed_ip_address = fixed;
        Ok(fip.clone())
    }

    async fn disassociate_floating_ip(&self, id: &str) -> Result<FloatingIp, CloudError> {
        self.enter("disassociate_floating_ip", id)?;
        let mut state = self.state();
        let Some(fip) = state.floating_ips.iter_mut().find(|f| f.id == id) else {
            return Err(CloudError::NotFound(format!("floating IP {id}")));
        };
        fip.port_id = None;
        fip.fixed_ip_address = None;
        Ok(fip.clone())
    }

    async fn add_tag(&self, resource: TaggedResource, id: &str, tag: &str) -> Result<(), CloudError> {
        self.enter("add_tag", &format!("{} {id} {tag}", resource.collection()))?;
        let mut state = self.state();
        let tags = match resource {
            TaggedResource::Network => state.networks.iter_mut().find(|r| r.id == id).map(|r| &mut r.tags),
            TaggedResource::Subnet => state.subnets.iter_mut().find(|r| r.id == id).map(|r| &mut r.tags),
            TaggedResource::Router => state.routers.iter_mut().find(|r| r.id == id).map(|r| &mut r.tags),
            TaggedResource::Port => state.ports.iter_mut().find(|r| r.id == id).map(|r| &mut r.tags),
            TaggedResource::FloatingIp => state.floating_ips.iter_mut().find(|r| r.id == id).map(|r| &mut r.tags),
            TaggedResource::SecurityGroup => state
                .security_groups
                .iter_mut()
                .find(|r| r.id == id)
                .map(|r| &mut r.tags),
            TaggedResource::Trunk => None,
        };
        let Some(tags) = tags else {
            return Err(CloudError::NotFound(format!("{} {id}", resource.collection())));
        };
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
        Ok(())
    }

    async fn list_security_groups(&self, filters: &[(&str, &str)]) -> Result<Vec<SecurityGroup>, CloudError> {
        self.enter("list_security_groups", "")?;
        Ok(self
            .state()
            .security_groups
            .iter()
            .filter(|g| matches(*g, filters))
            .cloned()
            .collect())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup, CloudError> {
        self.enter("create_security_group", name)?;
        let group = SecurityGroup {
            id: Self::new_id("sg"),
            name: name.to_string(),
            description: description.to_string(),
            rules: Vec::new(),
            tags: Vec::new(),
        };
        self.state().security_groups.push(group.clone());
        Ok(group)
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_security_group", id)?;
        let mut state = self.state();
        if state.ports.iter().any(|p| p.security_groups.iter().any(|g| g == id)) {
            return Err(CloudError::Conflict(format!("security group {id} is in use")));
        }
        state.security_groups.retain(|g| g.id != id);
        Ok(())
    }

    async fn create_security_group_rule(
        &self,
        request: CreateSecurityGroupRuleRequest,
    ) -> Result<SecurityGroupRule, CloudError> {
        self.enter("create_security_group_rule", &request.security_group_id)?;
        let mut state = self.state();
        let Some(group) = state
            .security_groups
            .iter_mut()
            .find(|g| g.id == request.security_group_id)
        else {
            return Err(CloudError::NotFound(format!(
                "security group {}",
                request.security_group_id
            )));
        };
        let rule = SecurityGroupRule {
            id: Self::new_id("rule"),
            security_group_id: request.security_group_id,
            description: request.description,
            direction: request.direction,
            ether_type: request.ether_type,
            protocol: request.protocol,
            port_range_min: request.port_range_min,
            port_range_max: request.port_range_max,
            remote_group_id: request.remote_group_id,
            remote_ip_prefix: request.remote_ip_prefix,
        };
        let duplicate = group.rules.iter().any(|r| {
            SecurityGroupRule {
                id: rule.id.clone(),
                description: rule.description.clone(),
                ..r.clone()
            } == rule
        });
        if duplicate {
            return Err(CloudError::Conflict("security group rule already exists".to_string()));
        }
        group.rules.push(rule.clone());
        Ok(rule)
    }

    async fn delete_security_group_rule(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_security_group_rule", id)?;
        for group in &mut self.state().security_groups {
            group.rules.retain(|r| r.id != id);
        }
        Ok(())
    }
}
