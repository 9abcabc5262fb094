//! Bastion host of a cluster.
//!
//! The bastion is a CloudServer owned by the cluster. The template it was created
//! from is recorded as a hash in status; a different hash means the server is
//! deleted and created again on a later pass.

use super::security_groups;
use super::{REQUEUE_BASTION, Reconciler, naming, owner_reference};
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use crds::conditions::{reasons, set_condition, types};
use crds::{
    BastionStatus, CLUSTER_NAME_LABEL, CloudCluster, CloudClusterStatus, CloudServer, CloudServerSpec, Condition,
    ConditionSeverity, NetworkParam, SecurityGroupParam, ServerTemplate,
};
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::info;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Stable hash of what the bastion server is built from
pub(crate) fn bastion_spec_hash(
    template: &ServerTemplate,
    availability_zone: Option<&str>,
) -> Result<String, ControllerError> {
    let canonical = serde_json::to_vec(&(template, availability_zone))?;
    Ok(format!("{:016x}", fnv1a(&canonical)))
}

fn provisioning(status: &mut CloudClusterStatus, message: impl Into<String>) {
    set_condition(
        &mut status.conditions,
        Condition::false_(
            types::BASTION_READY,
            reasons::BASTION_PROVISIONING,
            ConditionSeverity::Info,
            message,
        ),
    );
}

impl<S: ObjectStore> Reconciler<S> {
    /// Converge the bastion. `Some(action)` while it is being created, replaced
    /// or removed.
    pub(crate) async fn reconcile_bastion(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<Option<Action>, ControllerError> {
        let server_name = naming::bastion_name(name);
        let server = self.store.get::<CloudServer>(namespace, &server_name).await?;

        let Some(bastion) = cluster.spec.bastion.as_ref().filter(|b| b.enabled) else {
            if server.is_some() || status.bastion.is_some() {
                info!("Bastion of cluster {}/{} is disabled, removing it", namespace, name);
                return self.delete_bastion(cluster, namespace, name, status).await;
            }
            return Ok(None);
        };

        let hash = bastion_spec_hash(&bastion.spec, bastion.availability_zone.as_deref())?;
        let Some(server) = server else {
            self.create_bastion_server(cluster, namespace, name, status).await?;
            status.bastion = Some(BastionStatus {
                name: server_name,
                spec_hash: Some(hash),
                ..Default::default()
            });
            provisioning(status, "bastion server created");
            return Ok(Some(Action::requeue(REQUEUE_BASTION)));
        };

        let recorded = status.bastion.as_ref().and_then(|b| b.spec_hash.clone());
        // a server without a recorded hash is adopted as is
        if recorded.as_ref().is_some_and(|r| *r != hash) {
            info!("Bastion template of cluster {}/{} changed, replacing the bastion", namespace, name);
            self.delete_bastion(cluster, namespace, name, status).await?;
            provisioning(status, "bastion template changed, replacing it");
            return Ok(Some(Action::requeue(REQUEUE_BASTION)));
        }

        let server_status = server.status.clone().unwrap_or_default();
        let mut observed = BastionStatus {
            id: server_status.instance_id.clone(),
            name: server_name.clone(),
            state: server_status.instance_state.as_ref().map(ToString::to_string),
            ip: None,
            floating_ip: status.bastion.as_ref().and_then(|b| b.floating_ip.clone()),
            spec_hash: Some(hash),
        };

        if let Some(reason) = &server_status.failure_reason {
            status.bastion = Some(observed);
            return Err(ControllerError::Reconciliation(format!(
                "bastion server {namespace}/{server_name} failed: {reason}"
            )));
        }
        if !server_status.ready {
            status.bastion = Some(observed);
            provisioning(status, "waiting for the bastion server");
            return Ok(Some(Action::requeue(REQUEUE_BASTION)));
        }

        let (Some(instance_id), Some(network)) = (&server_status.instance_id, &status.network) else {
            status.bastion = Some(observed);
            return Ok(Some(Action::requeue(REQUEUE_BASTION)));
        };
        let Some(port) = self
            .cloud
            .get_management_port(instance_id, &network.id)
            .await
            .with_op(|| format!("get management port of {instance_id}"))?
        else {
            status.bastion = Some(observed);
            provisioning(status, "bastion has no port on the cluster network yet");
            return Ok(Some(Action::requeue(REQUEUE_BASTION)));
        };
        observed.ip = port.fixed_ips.iter().find_map(|ip| ip.ip_address.clone());

        if let Some(external) = &status.external_network {
            let associated = self
                .cloud
                .list_floating_ips(&[("port_id", port.id.as_str())])
                .await
                .with_op(|| format!("list floating IPs of port {}", port.id))?;
            let fip = match associated.into_iter().next() {
                Some(fip) => fip,
                None => {
                    let wanted = bastion.floating_ip.as_deref().or(observed.floating_ip.as_deref());
                    let fip = self
                        .get_or_create_floating_ip(
                            &external.id,
                            wanted,
                            &naming::bastion_floating_ip_tag(namespace, name),
                            &format!("Bastion of cluster {namespace}/{name}"),
                        )
                        .await?;
                    self.ensure_floating_ip_association(&fip, &port.id).await?;
                    fip
                }
            };
            observed.floating_ip = Some(fip.floating_ip_address);
        }

        status.bastion = Some(observed);
        set_condition(&mut status.conditions, Condition::true_(types::BASTION_READY));
        Ok(None)
    }

    async fn create_bastion_server(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        let Some(bastion) = &cluster.spec.bastion else {
            return Ok(());
        };
        let server_name = naming::bastion_name(name);
        let mut template = bastion.spec.clone();
        if let Some(zone) = &bastion.availability_zone {
            template.availability_zone = Some(zone.clone());
        }
        if let Some(group) = &status.bastion_security_group {
            template.security_groups.push(SecurityGroupParam::by_id(&group.id));
        } else if cluster.spec.managed_security_groups.is_some() {
            return Err(ControllerError::Reconciliation(format!(
                "{} security group of cluster {namespace}/{name} does not exist yet",
                security_groups::BASTION
            )));
        }

        let mut server = CloudServer::new(
            &server_name,
            CloudServerSpec {
                template,
                user_data_ref: None,
                cluster_network: status.network.as_ref().map(|n| NetworkParam::by_id(&n.id)),
            },
        );
        server.metadata.namespace = Some(namespace.to_string());
        server.metadata.owner_references = Some(vec![owner_reference(cluster)?]);
        server.metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), name.to_string())]));
        self.store.create(namespace, &server).await?;
        info!("Created bastion CloudServer {}/{}", namespace, server_name);
        Ok(())
    }

    /// Release the bastion floating IP and delete the server.
    ///
    /// `Some(action)` until the server is gone; status.bastion is cleared after.
    pub(crate) async fn delete_bastion(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<Option<Action>, ControllerError> {
        let pinned = cluster.spec.bastion.as_ref().and_then(|b| b.floating_ip.as_deref());
        if let Some(address) = status.bastion.as_ref().and_then(|b| b.floating_ip.clone()) {
            self.release_floating_ip(&address, pinned == Some(address.as_str())).await?;
            if let Some(bastion) = status.bastion.as_mut() {
                bastion.floating_ip = None;
            }
        }
        self.delete_tagged_floating_ips(&naming::bastion_floating_ip_tag(namespace, name), pinned)
            .await?;

        let server_name = naming::bastion_name(name);
        if self.store.get::<CloudServer>(namespace, &server_name).await?.is_some() {
            self.store.delete::<CloudServer>(namespace, &server_name).await?;
            if self.store.get::<CloudServer>(namespace, &server_name).await?.is_some() {
                info!("Waiting for bastion {}/{} to be deleted", namespace, server_name);
                return Ok(Some(Action::requeue(REQUEUE_BASTION)));
            }
        }
        status.bastion = None;
        set_condition(
            &mut status.conditions,
            Condition::false_(
                types::BASTION_READY,
                reasons::DELETING,
                ConditionSeverity::Info,
                "bastion removed",
            ),
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_hash_is_stable_and_sensitive() {
        let template = ServerTemplate {
            flavor: "m1.small".to_string(),
            ..Default::default()
        };
        let a = bastion_spec_hash(&template, Some("nova")).unwrap();
        assert_eq!(a, bastion_spec_hash(&template.clone(), Some("nova")).unwrap());
        assert_eq!(a.len(), 16);

        assert_ne!(a, bastion_spec_hash(&template, Some("az-2")).unwrap());
        let bigger = ServerTemplate {
            flavor: "m1.large".to_string(),
            ..Default::default()
        };
        assert_ne!(a, bastion_spec_hash(&bigger, Some("nova")).unwrap());
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
