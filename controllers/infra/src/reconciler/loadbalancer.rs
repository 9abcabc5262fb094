//! API-server load balancer of a cluster and its control-plane members.

use super::{REQUEUE_LOAD_BALANCER, Reconciler, ignore_not_found, naming};
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use cloud_client::{
    CreateLbPoolRequest, CreateListenerRequest, CreateLoadBalancerRequest, CreateMemberRequest, CreateMonitorRequest,
    LbPool, Listener, LoadBalancer,
};
use crds::conditions::{reasons, set_condition, types};
use crds::{CloudCluster, CloudClusterSpec, CloudClusterStatus, Condition, ConditionSeverity, LoadBalancerStatus};
use kube_runtime::controller::Action;
use tracing::{debug, info};

const LB_PROTOCOL: &str = "TCP";
const LB_ALGORITHM: &str = "ROUND_ROBIN";
const MONITOR_DELAY_SECS: u32 = 10;
const MONITOR_TIMEOUT_SECS: u32 = 5;
const MONITOR_MAX_RETRIES: u32 = 5;

/// API server port followed by the additional ports, without duplicates
pub(crate) fn load_balancer_ports(spec: &CloudClusterSpec) -> Vec<u16> {
    let mut ports = vec![spec.api_server_port()];
    if let Some(lb) = &spec.api_server_load_balancer {
        for port in &lb.additional_ports {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }
    }
    ports
}

/// Listener CIDRs: empty (open) unless the user restricts them, in which case the
/// cluster's own egress addresses are always allowed as well
pub(crate) fn effective_allowed_cidrs(spec: &CloudClusterSpec, status: &CloudClusterStatus) -> Vec<String> {
    let requested = spec
        .api_server_load_balancer
        .as_ref()
        .map(|lb| lb.allowed_cidrs.clone())
        .unwrap_or_default();
    if requested.is_empty() {
        return Vec::new();
    }
    let mut cidrs = requested;
    if let Some(network) = &status.network {
        cidrs.extend(network.subnets.iter().map(|s| s.cidr.clone()).filter(|c| !c.is_empty()));
    }
    if let Some(router) = &status.router {
        cidrs.extend(router.ips.iter().map(|ip| format!("{ip}/32")));
    }
    if let Some(fip) = status.bastion.as_ref().and_then(|b| b.floating_ip.as_ref()) {
        cidrs.push(format!("{fip}/32"));
    }
    cidrs.sort();
    cidrs.dedup();
    cidrs
}

fn sorted(cidrs: &[String]) -> Vec<String> {
    let mut cidrs = cidrs.to_vec();
    cidrs.sort();
    cidrs
}

impl<S: ObjectStore> Reconciler<S> {
    async fn find_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>, ControllerError> {
        let found = self
            .cloud
            .list_load_balancers(&[("name", name)])
            .await
            .with_op(|| format!("list load balancers {name}"))?;
        Ok(found.into_iter().next())
    }

    /// Converge the load balancer, its listeners, pools and monitors and the VIP
    /// floating IP. `Some(action)` while the load balancer is not ACTIVE.
    pub(crate) async fn reconcile_load_balancer(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<Option<Action>, ControllerError> {
        let spec = &cluster.spec;
        let lb_name = naming::load_balancer_name(namespace, name);

        let lb = match self.find_load_balancer(&lb_name).await? {
            Some(lb) => lb,
            None => {
                let subnet_id = status
                    .network
                    .as_ref()
                    .and_then(|n| n.subnets.first())
                    .map(|s| s.id.clone())
                    .ok_or_else(|| {
                        ControllerError::Reconciliation(format!(
                            "cluster {namespace}/{name} has no subnet for the load balancer VIP"
                        ))
                    })?;
                let lb = self
                    .cloud
                    .create_load_balancer(CreateLoadBalancerRequest {
                        name: lb_name.clone(),
                        vip_subnet_id: subnet_id,
                        provider: spec.api_server_load_balancer.as_ref().and_then(|lb| lb.provider.clone()),
                        description: format!("API server load balancer of cluster {namespace}/{name}"),
                    })
                    .await
                    .with_op(|| format!("create load balancer {lb_name}"))?;
                info!("Created load balancer {} ({})", lb_name, lb.id);
                lb
            }
        };

        let mut lb_status = LoadBalancerStatus {
            id: lb.id.clone(),
            name: lb.name.clone(),
            ip: status.api_server_load_balancer.as_ref().and_then(|s| s.ip.clone()),
            internal_ip: lb.vip_address.clone(),
            allowed_cidrs: Vec::new(),
        };

        if lb.provisioning_status.eq_ignore_ascii_case("ERROR") {
            status.api_server_load_balancer = Some(lb_status);
            return Err(ControllerError::Reconciliation(format!(
                "load balancer {lb_name} is in ERROR state"
            )));
        }
        if !lb.is_active() {
            debug!("Load balancer {} is {}", lb_name, lb.provisioning_status);
            status.api_server_load_balancer = Some(lb_status);
            set_condition(
                &mut status.conditions,
                Condition::false_(
                    types::API_ENDPOINT_READY,
                    reasons::LOAD_BALANCER_PROVISIONING,
                    ConditionSeverity::Info,
                    format!("load balancer {lb_name} is {}", lb.provisioning_status),
                ),
            );
            return Ok(Some(Action::requeue(REQUEUE_LOAD_BALANCER)));
        }

        let allowed_cidrs = effective_allowed_cidrs(spec, status);
        let listeners = self
            .cloud
            .list_listeners(&lb.id)
            .await
            .with_op(|| format!("list listeners of {lb_name}"))?;
        let pools = self
            .cloud
            .list_pools(&lb.id)
            .await
            .with_op(|| format!("list pools of {lb_name}"))?;

        for port in load_balancer_ports(spec) {
            let port_name = naming::load_balancer_port_name(namespace, name, port);
            let listener = self
                .ensure_listener(&lb, &listeners, &port_name, port, &allowed_cidrs)
                .await?;
            let pool = self.ensure_pool(&pools, &listener, &port_name).await?;
            self.ensure_monitor(&pool, &port_name).await?;
        }
        lb_status.allowed_cidrs = allowed_cidrs;

        if let Some(external) = status
            .external_network
            .as_ref()
            .filter(|_| !spec.disable_api_server_floating_ip)
        {
            let associated = self
                .cloud
                .list_floating_ips(&[("port_id", lb.vip_port_id.as_str())])
                .await
                .with_op(|| format!("list floating IPs of {lb_name}"))?;
            let fip = match associated.into_iter().next() {
                Some(fip) => fip,
                None => {
                    self.get_or_create_floating_ip(
                        &external.id,
                        spec.api_server_floating_ip.as_deref(),
                        &naming::cluster_api_tag(namespace, name),
                        &format!("API server load balancer of cluster {namespace}/{name}"),
                    )
                    .await?
                }
            };
            self.ensure_floating_ip_association(&fip, &lb.vip_port_id).await?;
            lb_status.ip = Some(fip.floating_ip_address);
        }

        status.api_server_load_balancer = Some(lb_status);
        Ok(None)
    }

    async fn ensure_listener(
        &self,
        lb: &LoadBalancer,
        listeners: &[Listener],
        name: &str,
        port: u16,
        allowed_cidrs: &[String],
    ) -> Result<Listener, ControllerError> {
        if let Some(listener) = listeners.iter().find(|l| l.protocol_port == port) {
            if sorted(&listener.allowed_cidrs) != sorted(allowed_cidrs) {
                info!("Updating allowed CIDRs of listener {}", name);
                return self
                    .cloud
                    .update_listener_allowed_cidrs(&listener.id, allowed_cidrs)
                    .await
                    .with_op(|| format!("update listener {name}"));
            }
            return Ok(listener.clone());
        }
        let listener = self
            .cloud
            .create_listener(CreateListenerRequest {
                name: name.to_string(),
                loadbalancer_id: lb.id.clone(),
                protocol: LB_PROTOCOL.to_string(),
                protocol_port: port,
                allowed_cidrs: allowed_cidrs.to_vec(),
            })
            .await
            .with_op(|| format!("create listener {name}"))?;
        info!("Created listener {} ({})", name, listener.id);
        Ok(listener)
    }

    async fn ensure_pool(&self, pools: &[LbPool], listener: &Listener, name: &str) -> Result<LbPool, ControllerError> {
        if let Some(pool) = pools.iter().find(|p| p.listener_id == listener.id) {
            return Ok(pool.clone());
        }
        let pool = self
            .cloud
            .create_pool(CreateLbPoolRequest {
                name: name.to_string(),
                listener_id: listener.id.clone(),
                protocol: LB_PROTOCOL.to_string(),
                lb_algorithm: LB_ALGORITHM.to_string(),
            })
            .await
            .with_op(|| format!("create pool {name}"))?;
        info!("Created pool {} ({})", name, pool.id);
        Ok(pool)
    }

    async fn ensure_monitor(&self, pool: &LbPool, name: &str) -> Result<(), ControllerError> {
        let monitors = self
            .cloud
            .list_monitors(&pool.id)
            .await
            .with_op(|| format!("list monitors of {name}"))?;
        if !monitors.is_empty() {
            return Ok(());
        }
        let monitor = self
            .cloud
            .create_monitor(CreateMonitorRequest {
                name: name.to_string(),
                pool_id: pool.id.clone(),
                monitor_type: LB_PROTOCOL.to_string(),
                delay: MONITOR_DELAY_SECS,
                timeout: MONITOR_TIMEOUT_SECS,
                max_retries: MONITOR_MAX_RETRIES,
            })
            .await
            .with_op(|| format!("create monitor {name}"))?;
        info!("Created monitor {} ({})", name, monitor.id);
        Ok(())
    }

    /// Delete the load balancer (cascading to listeners, pools and members) and
    /// release its VIP floating IP
    pub(crate) async fn delete_load_balancer(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        let lb_name = naming::load_balancer_name(namespace, name);
        if let Some(lb) = self.find_load_balancer(&lb_name).await? {
            let associated = self
                .cloud
                .list_floating_ips(&[("port_id", lb.vip_port_id.as_str())])
                .await
                .with_op(|| format!("list floating IPs of {lb_name}"))?;
            for fip in associated {
                let keep = cluster.spec.api_server_floating_ip.as_deref() == Some(fip.floating_ip_address.as_str());
                self.release_floating_ip(&fip.floating_ip_address, keep).await?;
            }
            ignore_not_found(self.cloud.delete_load_balancer(&lb.id).await)
                .with_op(|| format!("delete load balancer {lb_name}"))?;
            info!("Deleted load balancer {} ({})", lb_name, lb.id);
        }
        status.api_server_load_balancer = None;
        Ok(())
    }

    /// Make `machine` a member on every load-balancer port.
    ///
    /// Returns `false` while the load balancer is not ACTIVE.
    pub(crate) async fn reconcile_load_balancer_members(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        cluster_name: &str,
        machine: &str,
        address: &str,
    ) -> Result<bool, ControllerError> {
        let lb_name = naming::load_balancer_name(namespace, cluster_name);
        let Some(lb) = self.find_load_balancer(&lb_name).await? else {
            return Ok(false);
        };
        if !lb.is_active() {
            return Ok(false);
        }
        let subnet_id = cluster
            .status
            .as_ref()
            .and_then(|s| s.network.as_ref())
            .and_then(|n| n.subnets.first())
            .map(|s| s.id.clone());

        let listeners = self
            .cloud
            .list_listeners(&lb.id)
            .await
            .with_op(|| format!("list listeners of {lb_name}"))?;
        let pools = self
            .cloud
            .list_pools(&lb.id)
            .await
            .with_op(|| format!("list pools of {lb_name}"))?;

        for port in load_balancer_ports(&cluster.spec) {
            let Some(pool) = listeners
                .iter()
                .find(|l| l.protocol_port == port)
                .and_then(|l| pools.iter().find(|p| p.listener_id == l.id))
            else {
                return Ok(false);
            };
            let member_name = naming::load_balancer_member_name(machine, port);
            let members = self
                .cloud
                .list_members(&pool.id)
                .await
                .with_op(|| format!("list members of {}", pool.name))?;
            if let Some(existing) = members.iter().find(|m| m.name == member_name) {
                if existing.address == address {
                    continue;
                }
                info!("Member {} moved from {} to {}, replacing it", member_name, existing.address, address);
                ignore_not_found(self.cloud.delete_member(&pool.id, &existing.id).await)
                    .with_op(|| format!("delete member {member_name}"))?;
            }
            self.cloud
                .create_member(
                    &pool.id,
                    CreateMemberRequest {
                        name: member_name.clone(),
                        address: address.to_string(),
                        protocol_port: port,
                        subnet_id: subnet_id.clone(),
                    },
                )
                .await
                .with_op(|| format!("create member {member_name}"))?;
            info!("Added {} ({}) to load balancer {} on port {}", machine, address, lb_name, port);
        }
        Ok(true)
    }

    /// Remove every member of `machine` from the load balancer
    pub(crate) async fn delete_load_balancer_members(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        cluster_name: &str,
        machine: &str,
    ) -> Result<(), ControllerError> {
        let lb_name = naming::load_balancer_name(namespace, cluster_name);
        let Some(lb) = self.find_load_balancer(&lb_name).await? else {
            return Ok(());
        };
        let pools = self
            .cloud
            .list_pools(&lb.id)
            .await
            .with_op(|| format!("list pools of {lb_name}"))?;
        let names: Vec<String> = load_balancer_ports(&cluster.spec)
            .into_iter()
            .map(|port| naming::load_balancer_member_name(machine, port))
            .collect();
        for pool in pools {
            let members = self
                .cloud
                .list_members(&pool.id)
                .await
                .with_op(|| format!("list members of {}", pool.name))?;
            for member in members.iter().filter(|m| names.contains(&m.name)) {
                ignore_not_found(self.cloud.delete_member(&pool.id, &member.id).await)
                    .with_op(|| format!("delete member {}", member.name))?;
                info!("Removed member {} from load balancer {}", member.name, lb_name);
            }
        }
        Ok(())
    }
}
