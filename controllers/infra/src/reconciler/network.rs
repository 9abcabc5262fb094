//! Cluster network topology: external network, then either a pre-existing network
//! or a managed network, subnet and router.

use super::{Reconciler, ignore_not_found, naming};
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use cloud_client::{
    AllocationPool, CreateNetworkRequest, CreateRouterRequest, CreateSubnetRequest, ExternalGateway, Network, Router,
    Subnet, TaggedResource,
};
use crds::{CloudCluster, CloudClusterSpec, CloudClusterStatus, NetworkStatus, RouterStatus, SubnetStatus};
use tracing::{debug, info};

const ROUTER_INTERFACE_OWNER: &str = "network:router_interface";

fn network_status(network: &Network, subnets: &[Subnet]) -> NetworkStatus {
    NetworkStatus {
        id: network.id.clone(),
        name: network.name.clone(),
        tags: network.tags.clone(),
        subnets: subnets
            .iter()
            .map(|s| SubnetStatus {
                id: s.id.clone(),
                name: s.name.clone(),
                cidr: s.cidr.clone(),
            })
            .collect(),
    }
}

fn router_status(router: &Router) -> RouterStatus {
    RouterStatus {
        id: router.id.clone(),
        name: router.name.clone(),
        ips: router.gateway_ips(),
    }
}

/// Checks that need no provider call
pub(crate) fn validate_network_spec(spec: &CloudClusterSpec) -> Result<(), ControllerError> {
    if spec.managed_subnets.len() > 1 {
        return Err(ControllerError::InvalidConfig(format!(
            "at most one managed subnet is supported, got {}",
            spec.managed_subnets.len()
        )));
    }
    if !spec.managed_subnets.is_empty() && (spec.network.is_some() || !spec.subnets.is_empty()) {
        return Err(ControllerError::InvalidConfig(
            "managed subnets cannot be combined with a pre-existing network or subnets".to_string(),
        ));
    }
    if spec.managed_subnets.is_empty() && spec.network.is_none() && spec.subnets.is_empty() {
        return Err(ControllerError::InvalidConfig(
            "either managed subnets or a pre-existing network or subnet is required".to_string(),
        ));
    }
    if spec.disable_external_network && spec.external_network.is_some() {
        return Err(ControllerError::InvalidConfig(
            "externalNetwork is set although the external network is disabled".to_string(),
        ));
    }
    Ok(())
}

impl<S: ObjectStore> Reconciler<S> {
    /// Resolve the external network into status. With no explicit parameter the
    /// single provider network marked external is used, if there is exactly one.
    pub(crate) async fn reconcile_external_network(
        &self,
        cluster: &CloudCluster,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        let spec = &cluster.spec;
        if spec.disable_external_network {
            status.external_network = None;
            return Ok(());
        }
        let network = match &spec.external_network {
            Some(param) => Some(self.resolve_network(param).await?),
            None => {
                let mut external = self
                    .cloud
                    .list_networks(&[("router:external", "true")])
                    .await
                    .op("list external networks")?;
                match external.len() {
                    0 => None,
                    1 => Some(external.remove(0)),
                    n => {
                        return Err(ControllerError::InvalidConfig(format!(
                            "found {n} external networks, set externalNetwork to pick one"
                        )));
                    }
                }
            }
        };
        if network.is_none() {
            debug!("No external network available");
        }
        status.external_network = network.map(|n| network_status(&n, &[]));
        Ok(())
    }

    /// Resolve or create the cluster network, subnet and router into status
    pub(crate) async fn reconcile_network_topology(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        if cluster.spec.managed_subnets.is_empty() {
            self.reconcile_existing_network(cluster, status).await
        } else {
            self.reconcile_managed_network(cluster, namespace, name, status).await
        }
    }

    async fn reconcile_existing_network(
        &self,
        cluster: &CloudCluster,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        let spec = &cluster.spec;
        let network = match &spec.network {
            Some(param) => self.resolve_network(param).await?,
            None => {
                let Some(first) = spec.subnets.first() else {
                    return Err(ControllerError::InvalidConfig("no network and no subnet given".to_string()));
                };
                let subnet = self.resolve_subnet(first, None).await?;
                self.cloud
                    .get_network(&subnet.network_id)
                    .await
                    .with_op(|| format!("get network {}", subnet.network_id))?
                    .ok_or_else(|| ControllerError::NotFound(format!("network {}", subnet.network_id)))?
            }
        };

        let subnets = if spec.subnets.is_empty() {
            self.cloud
                .list_subnets(&[("network_id", network.id.as_str())])
                .await
                .with_op(|| format!("list subnets of {}", network.id))?
        } else {
            let mut subnets = Vec::with_capacity(spec.subnets.len());
            for param in &spec.subnets {
                subnets.push(self.resolve_subnet(param, Some(&network.id)).await?);
            }
            subnets
        };
        if subnets.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "network {} has no subnets",
                network.id
            )));
        }

        status.router = match &spec.router {
            Some(param) => Some(router_status(&self.resolve_router(param).await?)),
            None => None,
        };
        status.network = Some(network_status(&network, &subnets));
        Ok(())
    }

    async fn reconcile_managed_network(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        let spec = &cluster.spec;
        let resource_name = naming::cluster_resource_name(namespace, name);
        let description = format!("Created for cluster {namespace}/{name}");

        let existing = self
            .cloud
            .list_networks(&[("name", resource_name.as_str())])
            .await
            .with_op(|| format!("list networks {resource_name}"))?;
        let network = match existing.into_iter().next() {
            Some(network) => network,
            None => {
                let network = self
                    .cloud
                    .create_network(CreateNetworkRequest {
                        name: resource_name.clone(),
                        admin_state_up: true,
                        mtu: spec.network_mtu,
                        port_security_enabled: spec.disable_port_security.then_some(false),
                        description: Some(description.clone()),
                    })
                    .await
                    .with_op(|| format!("create network {resource_name}"))?;
                info!("Created network {} ({})", resource_name, network.id);
                self.tag_resource(TaggedResource::Network, &network.id, &spec.tags).await?;
                network
            }
        };

        // at most one, enforced by validation
        let mut subnets = Vec::new();
        for managed in &spec.managed_subnets {
            let existing = self
                .cloud
                .list_subnets(&[("name", resource_name.as_str()), ("network_id", network.id.as_str())])
                .await
                .with_op(|| format!("list subnets {resource_name}"))?;
            let subnet = match existing.into_iter().next() {
                Some(subnet) => subnet,
                None => {
                    let subnet = self
                        .cloud
                        .create_subnet(CreateSubnetRequest {
                            name: resource_name.clone(),
                            network_id: network.id.clone(),
                            cidr: managed.cidr.clone(),
                            ip_version: 4,
                            dns_nameservers: managed.dns_nameservers.clone(),
                            allocation_pools: managed
                                .allocation_pools
                                .iter()
                                .map(|p| AllocationPool {
                                    start: p.start.clone(),
                                    end: p.end.clone(),
                                })
                                .collect(),
                            description: Some(description.clone()),
                        })
                        .await
                        .with_op(|| format!("create subnet {resource_name}"))?;
                    info!("Created subnet {} ({}, {})", resource_name, subnet.id, subnet.cidr);
                    self.tag_resource(TaggedResource::Subnet, &subnet.id, &spec.tags).await?;
                    subnet
                }
            };
            subnets.push(subnet);
        }

        let router = match (&spec.router, &status.external_network) {
            (Some(param), _) => Some(self.resolve_router(param).await?),
            (None, Some(external)) => {
                let existing = self
                    .cloud
                    .list_routers(&[("name", resource_name.as_str())])
                    .await
                    .with_op(|| format!("list routers {resource_name}"))?;
                match existing.into_iter().next() {
                    Some(router) => Some(router),
                    None => {
                        let router = self
                            .cloud
                            .create_router(CreateRouterRequest {
                                name: resource_name.clone(),
                                external_gateway_info: Some(ExternalGateway {
                                    network_id: external.id.clone(),
                                    external_fixed_ips: Vec::new(),
                                }),
                                description: Some(description.clone()),
                            })
                            .await
                            .with_op(|| format!("create router {resource_name}"))?;
                        info!("Created router {} ({})", resource_name, router.id);
                        self.tag_resource(TaggedResource::Router, &router.id, &spec.tags).await?;
                        Some(router)
                    }
                }
            }
            // no external network: nothing to route to
            (None, None) => None,
        };

        if let Some(router) = &router {
            let interfaces = self
                .cloud
                .list_ports(&[
                    ("device_id", router.id.as_str()),
                    ("network_id", network.id.as_str()),
                ])
                .await
                .with_op(|| format!("list interfaces of router {}", router.id))?;
            for subnet in &subnets {
                let attached = interfaces
                    .iter()
                    .any(|p| p.fixed_ips.iter().any(|ip| ip.subnet_id.as_deref() == Some(subnet.id.as_str())));
                if !attached {
                    self.cloud
                        .add_router_interface(&router.id, &subnet.id)
                        .await
                        .with_op(|| format!("attach subnet {} to router {}", subnet.id, router.id))?;
                    info!("Attached subnet {} to router {}", subnet.id, router.id);
                }
            }
        }

        status.router = router.as_ref().map(router_status);
        status.network = Some(network_status(&network, &subnets));
        Ok(())
    }

    async fn tag_resource(&self, resource: TaggedResource, id: &str, tags: &[String]) -> Result<(), ControllerError> {
        for tag in tags {
            self.cloud
                .add_tag(resource, id, tag)
                .await
                .with_op(|| format!("tag {} {id}", resource.collection()))?;
        }
        Ok(())
    }

    /// Tear down a managed topology: router interfaces, router, leftover ports,
    /// network. A pre-existing topology is left alone.
    pub(crate) async fn delete_network_topology(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        let spec = &cluster.spec;
        if spec.managed_subnets.is_empty() {
            status.network = None;
            status.router = None;
            return Ok(());
        }
        let resource_name = naming::cluster_resource_name(namespace, name);

        let networks = self
            .cloud
            .list_networks(&[("name", resource_name.as_str())])
            .await
            .with_op(|| format!("list networks {resource_name}"))?;
        let routers = match &spec.router {
            Some(param) => match self.resolve_router(param).await {
                Ok(router) => vec![router],
                Err(ControllerError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            },
            None => self
                .cloud
                .list_routers(&[("name", resource_name.as_str())])
                .await
                .with_op(|| format!("list routers {resource_name}"))?,
        };

        for network in &networks {
            let subnets = self
                .cloud
                .list_subnets(&[("network_id", network.id.as_str())])
                .await
                .with_op(|| format!("list subnets of {}", network.id))?;
            for router in &routers {
                for subnet in &subnets {
                    ignore_not_found(self.cloud.remove_router_interface(&router.id, &subnet.id).await)
                        .with_op(|| format!("detach subnet {} from router {}", subnet.id, router.id))?;
                }
            }
        }

        // a user-supplied router only loses its interface
        if spec.router.is_none() {
            for router in &routers {
                ignore_not_found(self.cloud.delete_router(&router.id).await)
                    .with_op(|| format!("delete router {}", router.id))?;
                info!("Deleted router {} ({})", router.name, router.id);
            }
        }

        for network in &networks {
            let ports = self
                .cloud
                .list_ports(&[("network_id", network.id.as_str())])
                .await
                .with_op(|| format!("list ports of {}", network.id))?;
            for port in ports.iter().filter(|p| p.device_owner != ROUTER_INTERFACE_OWNER) {
                ignore_not_found(self.cloud.delete_port(&port.id).await)
                    .with_op(|| format!("delete port {}", port.id))?;
                debug!("Deleted leftover port {} on {}", port.id, network.id);
            }
            ignore_not_found(self.cloud.delete_network(&network.id).await)
                .with_op(|| format!("delete network {}", network.id))?;
            info!("Deleted network {} ({})", network.name, network.id);
        }

        status.network = None;
        status.router = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{NetworkParam, SubnetSpec};

    fn empty_spec() -> CloudClusterSpec {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }

    #[test]
    fn test_validate_rejects_two_managed_subnets() {
        let mut spec = empty_spec();
        spec.managed_subnets = vec![
            SubnetSpec {
                cidr: "10.6.0.0/24".to_string(),
                ..Default::default()
            },
            SubnetSpec {
                cidr: "10.7.0.0/24".to_string(),
                ..Default::default()
            },
        ];
        assert!(matches!(validate_network_spec(&spec), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_mixed_topology() {
        let mut spec = empty_spec();
        spec.managed_subnets = vec![SubnetSpec {
            cidr: "10.6.0.0/24".to_string(),
            ..Default::default()
        }];
        spec.network = Some(NetworkParam::by_id("net-1"));
        assert!(validate_network_spec(&spec).is_err());
    }

    #[test]
    fn test_validate_requires_some_network() {
        assert!(validate_network_spec(&empty_spec()).is_err());
        let mut spec = empty_spec();
        spec.network = Some(NetworkParam::by_id("net-1"));
        assert!(validate_network_spec(&spec).is_ok());
    }
}
