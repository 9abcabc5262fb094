//! Control-plane endpoint of a cluster.
//!
//! Once an endpoint is recorded in status it never moves. Until then the first
//! source that yields one wins, in this order: the endpoint pinned in spec, the
//! API-server load balancer, a floating IP, the fixed IP from spec.

use super::{Reconciler, naming};
use crate::error::{CloudResultExt, ControllerError};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::ObjectStore;
use cloud_client::{CreateFloatingIpRequest, FloatingIp, TaggedResource};
use crds::{ApiEndpoint, CloudCluster, CloudClusterStatus};
use kube_runtime::controller::Action;
use tracing::{info, warn};

fn pinned(status: &CloudClusterStatus) -> bool {
    status.control_plane_endpoint.as_ref().is_some_and(ApiEndpoint::is_set)
}

impl<S: ObjectStore> Reconciler<S> {
    /// Derive (or keep) the control-plane endpoint.
    ///
    /// Returns `Some(action)` while the load balancer is still converging.
    pub(crate) async fn reconcile_control_plane_endpoint(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<Option<Action>, ControllerError> {
        let spec = &cluster.spec;
        let port = spec.api_server_port();

        if let Some(endpoint) = spec.control_plane_endpoint.as_ref().filter(|e| e.is_set()) {
            status.control_plane_endpoint = Some(endpoint.clone());
        }

        // the load balancer is converged on every pass, pinned endpoint or not
        if spec.load_balancer_enabled() {
            if let Some(action) = self.reconcile_load_balancer(cluster, namespace, name, status).await? {
                return Ok(Some(action));
            }
            if !pinned(status) {
                let host = status
                    .api_server_load_balancer
                    .as_ref()
                    .map(|lb| lb.ip.clone().unwrap_or_else(|| lb.internal_ip.clone()))
                    .unwrap_or_default();
                if !host.is_empty() {
                    info!(
                        "Pinning control-plane endpoint {}:{} of {}/{} to the load balancer",
                        host, port, namespace, name
                    );
                    status.control_plane_endpoint = Some(ApiEndpoint { host, port });
                }
            }
        }

        if pinned(status) {
            return Ok(None);
        }

        if let Some(external) = status.external_network.as_ref().filter(|_| !spec.disable_api_server_floating_ip) {
            let wanted = spec
                .api_server_floating_ip
                .as_deref()
                .or(status.api_server_floating_ip.as_deref());
            let tag = naming::cluster_api_tag(namespace, name);
            let fip = self
                .get_or_create_floating_ip(
                    &external.id,
                    wanted,
                    &tag,
                    &format!("Control plane endpoint of cluster {namespace}/{name}"),
                )
                .await?;
            info!(
                "Pinning control-plane endpoint {}:{} of {}/{} to a floating IP",
                fip.floating_ip_address, port, namespace, name
            );
            status.api_server_floating_ip = Some(fip.floating_ip_address.clone());
            status.control_plane_endpoint = Some(ApiEndpoint {
                host: fip.floating_ip_address,
                port,
            });
            return Ok(None);
        }

        if let Some(fixed) = spec.api_server_fixed_ip.as_ref().filter(|ip| !ip.is_empty()) {
            status.control_plane_endpoint = Some(ApiEndpoint {
                host: fixed.clone(),
                port,
            });
            return Ok(None);
        }

        Err(ControllerError::InvalidConfig(format!(
            "no control-plane endpoint derivable for cluster {namespace}/{name}: \
             no load balancer, no floating IP and no fixed IP"
        )))
    }

    /// Floating IP with `address` if given, else one carrying `tag`, else a new one.
    ///
    /// New addresses are tagged so a pass that dies before recording them finds
    /// them again. A tagging failure is only logged.
    pub(crate) async fn get_or_create_floating_ip(
        &self,
        network_id: &str,
        address: Option<&str>,
        tag: &str,
        description: &str,
    ) -> Result<FloatingIp, ControllerError> {
        if let Some(address) = address {
            if let Some(fip) = self.find_floating_ip(address).await? {
                return Ok(fip);
            }
        } else {
            let tagged = self
                .cloud
                .list_floating_ips(&[("floating_network_id", network_id), ("tags", tag)])
                .await
                .with_op(|| format!("list floating IPs tagged {tag}"))?;
            if let Some(fip) = tagged.into_iter().next() {
                return Ok(fip);
            }
        }

        let fip = self
            .cloud
            .create_floating_ip(CreateFloatingIpRequest {
                floating_network_id: network_id.to_string(),
                floating_ip_address: address.map(str::to_string),
                port_id: None,
                description: description.to_string(),
            })
            .await
            .with_op(|| format!("create floating IP on {network_id}"))?;
        info!("Created floating IP {} ({})", fip.floating_ip_address, description);

        let tagged = retry_with_backoff(&RetryConfig::provider_tagging(), "tag floating IP", || {
            self.cloud.add_tag(TaggedResource::FloatingIp, &fip.id, tag)
        })
        .await;
        if let Err(e) = tagged {
            warn!("Failed to tag floating IP {}: {}", fip.floating_ip_address, e);
        }
        Ok(fip)
    }

    /// Associate `fip` with `port_id` unless it already is
    pub(crate) async fn ensure_floating_ip_association(
        &self,
        fip: &FloatingIp,
        port_id: &str,
    ) -> Result<(), ControllerError> {
        if fip.port_id.as_deref() == Some(port_id) {
            return Ok(());
        }
        self.cloud
            .associate_floating_ip(&fip.id, port_id)
            .await
            .with_op(|| format!("associate floating IP {}", fip.floating_ip_address))?;
        info!("Associated floating IP {} with port {}", fip.floating_ip_address, port_id);
        Ok(())
    }

    /// Give a floating IP back. A user-supplied address is only disassociated.
    pub(crate) async fn release_floating_ip(&self, address: &str, keep: bool) -> Result<(), ControllerError> {
        let Some(fip) = self.find_floating_ip(address).await? else {
            return Ok(());
        };
        if keep {
            if fip.port_id.is_some() {
                self.cloud
                    .disassociate_floating_ip(&fip.id)
                    .await
                    .with_op(|| format!("disassociate floating IP {address}"))?;
                info!("Disassociated floating IP {}", address);
            }
            return Ok(());
        }
        super::ignore_not_found(self.cloud.delete_floating_ip(&fip.id).await)
            .with_op(|| format!("delete floating IP {address}"))?;
        info!("Deleted floating IP {}", address);
        Ok(())
    }

    /// Delete every floating IP carrying `tag`
    pub(crate) async fn delete_tagged_floating_ips(
        &self,
        tag: &str,
        keep: Option<&str>,
    ) -> Result<(), ControllerError> {
        let tagged = self
            .cloud
            .list_floating_ips(&[("tags", tag)])
            .await
            .with_op(|| format!("list floating IPs tagged {tag}"))?;
        for fip in tagged {
            let keep = keep == Some(fip.floating_ip_address.as_str());
            self.release_floating_ip(&fip.floating_ip_address, keep).await?;
        }
        Ok(())
    }
}
