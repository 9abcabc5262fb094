//! CloudCluster reconciliation.
//!
//! A pass walks the cluster infrastructure in dependency order: validation,
//! external network, network topology, security groups, control-plane endpoint
//! (with the load balancer), bastion, failure domains. A step that needs to wait
//! ends the pass with a requeue; everything observed so far is still persisted.
//!
//! Deletion runs in reverse once every machine of the cluster is gone.

use super::network::validate_network_spec;
use super::{
    REQUEUE_AFTER_FINALIZER, REQUEUE_MACHINES_DELETING, Reconciler, add_finalizer, has_finalizer, is_deleting,
    namespaced_name, naming, remove_finalizer,
};
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use crds::conditions::{reasons, set_condition, types};
use crds::{
    CLUSTER_FINALIZER, CLUSTER_NAME_LABEL, CloudCluster, CloudClusterSpec, CloudClusterStatus, CloudMachine, Condition,
    ConditionSeverity, FailureDomain,
};
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::{debug, info};

fn failed_step(status: &mut CloudClusterStatus, condition: &str, reason: &str, error: &ControllerError) {
    let severity = match error {
        ControllerError::InvalidConfig(_) => ConditionSeverity::Error,
        _ => ConditionSeverity::Warning,
    };
    set_condition(
        &mut status.conditions,
        Condition::false_(condition, reason, severity, error.to_string()),
    );
    // a cluster that was ready once stays ready; machines keep joining
    if !status.ready {
        set_condition(
            &mut status.conditions,
            Condition::false_(types::READY, reason, severity, error.to_string()),
        );
    }
}

/// Failure domains from the provider's available zones
pub(crate) fn failure_domains(spec: &CloudClusterSpec, zones: &[String]) -> BTreeMap<String, FailureDomain> {
    zones
        .iter()
        .map(|zone| {
            let control_plane = spec.control_plane_availability_zones.is_empty()
                || spec.control_plane_availability_zones.contains(zone);
            (zone.clone(), FailureDomain { control_plane })
        })
        .collect()
}

impl<S: ObjectStore> Reconciler<S> {
    /// Reconciles a CloudCluster resource.
    pub async fn reconcile_cluster(&self, cluster: &CloudCluster) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(cluster)?;
        info!("Reconciling CloudCluster {}/{}", namespace, name);

        if is_deleting(cluster) {
            return self.delete_cluster(cluster).await;
        }

        if !has_finalizer(cluster, CLUSTER_FINALIZER) {
            let mut updated = cluster.clone();
            add_finalizer(&mut updated, CLUSTER_FINALIZER);
            self.store.replace(&updated).await?;
            debug!("Added finalizer to CloudCluster {}/{}", namespace, name);
            return Ok(Action::requeue(REQUEUE_AFTER_FINALIZER));
        }

        let mut status = cluster.status.clone().unwrap_or_default();
        let result = self.converge_cluster(cluster, &namespace, &name, &mut status).await;
        let mut updated = cluster.clone();
        updated.status = Some(status);
        self.write_status(cluster, &updated).await?;
        result
    }

    async fn converge_cluster(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<Action, ControllerError> {
        if let Err(e) = validate_network_spec(&cluster.spec) {
            failed_step(status, types::NETWORK_READY, reasons::INVALID_CONFIGURATION, &e);
            return Err(e);
        }

        let network = match self.reconcile_external_network(cluster, status).await {
            Ok(()) => self.reconcile_network_topology(cluster, namespace, name, status).await,
            Err(e) => Err(e),
        };
        if let Err(e) = network {
            failed_step(status, types::NETWORK_READY, reasons::NETWORK_ERROR, &e);
            return Err(e);
        }
        set_condition(&mut status.conditions, Condition::true_(types::NETWORK_READY));

        if let Err(e) = self.reconcile_security_groups(cluster, namespace, name, status).await {
            failed_step(status, types::SECURITY_GROUPS_READY, reasons::SECURITY_GROUP_ERROR, &e);
            return Err(e);
        }
        if cluster.spec.managed_security_groups.is_some() {
            set_condition(&mut status.conditions, Condition::true_(types::SECURITY_GROUPS_READY));
        }

        match self.reconcile_control_plane_endpoint(cluster, namespace, name, status).await {
            Ok(Some(action)) => return Ok(action),
            Ok(None) => set_condition(&mut status.conditions, Condition::true_(types::API_ENDPOINT_READY)),
            Err(e) => {
                let reason = if cluster.spec.load_balancer_enabled() {
                    reasons::LOAD_BALANCER_ERROR
                } else {
                    reasons::ENDPOINT_ERROR
                };
                failed_step(status, types::API_ENDPOINT_READY, reason, &e);
                return Err(e);
            }
        }

        match self.reconcile_bastion(cluster, namespace, name, status).await {
            Ok(Some(action)) => return Ok(action),
            Ok(None) => {}
            Err(e) => {
                failed_step(status, types::BASTION_READY, reasons::BASTION_ERROR, &e);
                return Err(e);
            }
        }

        let zones: Vec<String> = self
            .cloud
            .list_availability_zones()
            .await
            .op("list availability zones")?
            .into_iter()
            .filter(|z| z.available)
            .map(|z| z.name)
            .collect();
        status.failure_domains = failure_domains(&cluster.spec, &zones);

        if !status.ready {
            info!("CloudCluster {}/{} infrastructure is ready", namespace, name);
        }
        status.ready = true;
        set_condition(&mut status.conditions, Condition::true_(types::READY));
        Ok(Action::await_change())
    }

    /// Tear the cluster down in reverse dependency order
    async fn delete_cluster(&self, cluster: &CloudCluster) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(cluster)?;
        if !has_finalizer(cluster, CLUSTER_FINALIZER) {
            return Ok(Action::await_change());
        }
        info!("Deleting CloudCluster {}/{}", namespace, name);

        let mut status = cluster.status.clone().unwrap_or_default();
        status.ready = false;
        set_condition(
            &mut status.conditions,
            Condition::false_(
                types::READY,
                reasons::DELETING,
                ConditionSeverity::Info,
                "cluster is being deleted",
            ),
        );

        let result = self.teardown_cluster(cluster, &namespace, &name, &mut status).await;
        let mut updated = cluster.clone();
        updated.status = Some(status);
        let latest = self.write_status(cluster, &updated).await?;
        match result {
            Ok(Some(action)) => Ok(action),
            Ok(None) => {
                let mut latest = latest;
                remove_finalizer(&mut latest, CLUSTER_FINALIZER);
                self.store.replace(&latest).await?;
                info!("CloudCluster {}/{} deleted", namespace, name);
                Ok(Action::await_change())
            }
            Err(e) => Err(e),
        }
    }

    /// `Some(action)` while something still has to go away first
    async fn teardown_cluster(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<Option<Action>, ControllerError> {
        let machines = self
            .store
            .list::<CloudMachine>(namespace, &[(CLUSTER_NAME_LABEL, name)])
            .await?;
        if !machines.is_empty() {
            info!(
                "CloudCluster {}/{} still has {} machines, waiting",
                namespace,
                name,
                machines.len()
            );
            return Ok(Some(Action::requeue(REQUEUE_MACHINES_DELETING)));
        }

        if let Some(action) = self.delete_bastion(cluster, namespace, name, status).await? {
            return Ok(Some(action));
        }

        if cluster.spec.load_balancer_enabled() || status.api_server_load_balancer.is_some() {
            self.delete_load_balancer(cluster, namespace, name, status).await?;
        }

        let pinned = cluster.spec.api_server_floating_ip.as_deref();
        if let Some(address) = status.api_server_floating_ip.clone() {
            self.release_floating_ip(&address, pinned == Some(address.as_str())).await?;
            status.api_server_floating_ip = None;
        }
        self.delete_tagged_floating_ips(&naming::cluster_api_tag(namespace, name), pinned)
            .await?;

        self.delete_security_groups(namespace, name, status).await?;
        self.delete_network_topology(cluster, namespace, name, status).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_domains_follow_control_plane_zones() {
        let mut spec: CloudClusterSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        let zones = vec!["az-1".to_string(), "az-2".to_string()];

        let all = failure_domains(&spec, &zones);
        assert!(all.values().all(|d| d.control_plane));

        spec.control_plane_availability_zones = vec!["az-2".to_string()];
        let restricted = failure_domains(&spec, &zones);
        assert!(!restricted["az-1"].control_plane);
        assert!(restricted["az-2"].control_plane);
    }
}
