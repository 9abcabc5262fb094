//! Load balancer operations for MockCloudClient

use super::{MockCloudClient, matches};
use crate::error::CloudError;
use crate::models::*;
use crate::provider_trait::LoadBalancerService;

#[async_trait::async_trait]
impl LoadBalancerService for MockCloudClient {
    async fn list_load_balancers(&self, filters: &[(&str, &str)]) -> Result<Vec<LoadBalancer>, CloudError> {
        self.enter("list_load_balancers", "")?;
        Ok(self
            .state()
            .load_balancers
            .iter()
            .filter(|l| matches(*l, filters))
            .cloned()
            .collect())
    }

    async fn get_load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, CloudError> {
        self.enter("get_load_balancer", id)?;
        Ok(self.state().load_balancers.iter().find(|l| l.id == id).cloned())
    }

    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer, CloudError> {
        self.enter("create_load_balancer", &request.name)?;
        let mut state = self.state();
        let Some(network_id) = state
            .subnets
            .iter()
            .find(|s| s.id == request.vip_subnet_id)
            .map(|s| s.network_id.clone())
        else {
            return Err(CloudError::NotFound(format!("subnet {}", request.vip_subnet_id)));
        };
        let id = Self::new_id("lb");
        let vip_address = state.next_address("10.0.0");
        let vip_port = Port {
            id: Self::new_id("port"),
            name: format!("octavia-lb-{id}"),
            network_id,
            device_id: id.clone(),
            device_owner: "Octavia".to_string(),
            fixed_ips: vec![FixedIp {
                subnet_id: Some(request.vip_subnet_id.clone()),
                ip_address: Some(vip_address.clone()),
            }],
            ..Default::default()
        };
        let lb = LoadBalancer {
            id,
            name: request.name,
            vip_address,
            vip_port_id: vip_port.id.clone(),
            vip_subnet_id: request.vip_subnet_id,
            provisioning_status: state.new_load_balancer_status.clone(),
            provider: request.provider,
        };
        state.ports.push(vip_port);
        state.load_balancers.push(lb.clone());
        Ok(lb)
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_load_balancer", id)?;
        let mut state = self.state();
        let Some(lb) = state.load_balancers.iter().find(|l| l.id == id).cloned() else {
            return Ok(());
        };
        let pool_ids: Vec<String> = state
            .pools
            .iter()
            .filter(|p| p.loadbalancer_id == id)
            .map(|p| p.id.clone())
            .collect();
        for pool_id in &pool_ids {
            state.members.remove(pool_id);
        }
        state.monitors.retain(|m| !pool_ids.contains(&m.pool_id));
        state.pools.retain(|p| p.loadbalancer_id != id);
        state.listeners.retain(|l| l.loadbalancer_id != id);
        state.ports.retain(|p| p.id != lb.vip_port_id);
        for fip in state
            .floating_ips
            .iter_mut()
            .filter(|f| f.port_id.as_deref() == Some(lb.vip_port_id.as_str()))
        {
            fip.port_id = None;
            fip.fixed_ip_address = None;
        }
        state.load_balancers.retain(|l| l.id != id);
        Ok(())
    }

    async fn list_listeners(&self, load_balancer_id: &str) -> Result<Vec<Listener>, CloudError> {
        self.enter("list_listeners", load_balancer_id)?;
        Ok(self
            .state()
            .listeners
            .iter()
            .filter(|l| l.loadbalancer_id == load_balancer_id)
            .cloned()
            .collect())
    }

    async fn create_listener(&self, request: CreateListenerRequest) -> Result<Listener, CloudError> {
        self.enter("create_listener", &request.name)?;
        let listener = Listener {
            id: Self::new_id("listener"),
            name: request.name,
            protocol_port: request.protocol_port,
            loadbalancer_id: request.loadbalancer_id,
            allowed_cidrs: request.allowed_cidrs,
            default_pool_id: None,
        };
        self.state().listeners.push(listener.clone());
        Ok(listener)
    }

    async fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: &[String]) -> Result<Listener, CloudError> {
        self.enter("update_listener_allowed_cidrs", id)?;
        let mut state = self.state();
        let Some(listener) = state.listeners.iter_mut().find(|l| l.id == id) else {
            return Err(CloudError::NotFound(format!("listener {id}")));
        };
        listener.allowed_cidrs = allowed_cidrs.to_vec();
        Ok(listener.clone())
    }

    async fn list_pools(&self, load_balancer_id: &str) -> Result<Vec<LbPool>, CloudError> {
        self.enter("list_pools", load_balancer_id)?;
        Ok(self
            .state()
            .pools
            .iter()
            .filter(|p| p.loadbalancer_id == load_balancer_id)
            .cloned()
            .collect())
    }

    async fn create_pool(&self, request: CreateLbPoolRequest) -> Result<LbPool, CloudError> {
        self.enter("create_pool", &request.name)?;
        let mut state = self.state();
        let Some(listener) = state.listeners.iter_mut().find(|l| l.id == request.listener_id) else {
            return Err(CloudError::NotFound(format!("listener {}", request.listener_id)));
        };
        let pool = LbPool {
            id: Self::new_id("pool"),
            name: request.name,
            listener_id: request.listener_id,
            loadbalancer_id: listener.loadbalancer_id.clone(),
        };
        listener.default_pool_id = Some(pool.id.clone());
        state.pools.push(pool.clone());
        Ok(pool)
    }

    async fn list_monitors(&self, pool_id: &str) -> Result<Vec<Monitor>, CloudError> {
        self.enter("list_monitors", pool_id)?;
        Ok(self
            .state()
            .monitors
            .iter()
            .filter(|m| m.pool_id == pool_id)
            .cloned()
            .collect())
    }

    async fn create_monitor(&self, request: CreateMonitorRequest) -> Result<Monitor, CloudError> {
        self.enter("create_monitor", &request.name)?;
        let monitor = Monitor {
            id: Self::new_id("monitor"),
            name: request.name,
            pool_id: request.pool_id,
        };
        self.state().monitors.push(monitor.clone());
        Ok(monitor)
    }

    async fn list_members(&self, pool_id: &str) -> Result<Vec<Member>, CloudError> {
        self.enter("list_members", pool_id)?;
        Ok(self.state().members.get(pool_id).cloned().unwrap_or_default())
    }

    async fn create_member(&self, pool_id: &str, request: CreateMemberRequest) -> Result<Member, CloudError> {
        self.enter("create_member", &format!("{pool_id} {}", request.name))?;
        let mut state = self.state();
        if !state.pools.iter().any(|p| p.id == pool_id) {
            return Err(CloudError::NotFound(format!("pool {pool_id}")));
        }
        let member = Member {
            id: Self::new_id("member"),
            name: request.name,
            address: request.address,
            protocol_port: request.protocol_port,
        };
        state
            .members
            .entry(pool_id.to_string())
            .or_default()
            .push(member.clone());
        Ok(member)
    }

    async fn delete_member(&self, pool_id: &str, member_id: &str) -> Result<(), CloudError> {
        self.enter("delete_member", &format!("{pool_id} {member_id}"))?;
        if let Some(members) = self.state().members.get_mut(pool_id) {
            members.retain(|m| m.id != member_id);
        }
        Ok(())
    }
}
