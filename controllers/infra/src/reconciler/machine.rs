//! CloudMachine reconciliation.
//!
//! A machine owns one CloudServer of the same name. The machine waits for its
//! cluster and bootstrap data, creates the server, projects the server's state
//! back and, for control-plane machines, wires the node into the API endpoint.

use super::{
    REQUEUE_AFTER_FINALIZER, REQUEUE_DEPENDENCY, REQUEUE_LOAD_BALANCER, Reconciler, add_finalizer, has_finalizer,
    is_deleting, namespaced_name, owner_reference, remove_finalizer,
};
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use crds::conditions::{reasons, set_condition, types};
use crds::{
    CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, CloudCluster, CloudMachine, CloudMachineStatus, CloudServer,
    CloudServerSpec, CloudServerStatus, Condition, ConditionSeverity, MACHINE_FINALIZER, NetworkParam,
    SecurityGroupParam, provider_id,
};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

fn is_control_plane(machine: &CloudMachine) -> bool {
    machine.labels().contains_key(CONTROL_PLANE_LABEL)
}

fn waiting(status: &mut CloudMachineStatus, reason: &str, message: impl Into<String>) {
    status.ready = false;
    set_condition(
        &mut status.conditions,
        Condition::false_(types::READY, reason, ConditionSeverity::Info, message),
    );
}

/// Copy what the server knows onto the machine
fn project_server_status(status: &mut CloudMachineStatus, server: &CloudServerStatus) {
    status.provider_id = server.instance_id.as_deref().map(provider_id);
    status.instance_state.clone_from(&server.instance_state);
    status.addresses.clone_from(&server.addresses);
}

impl<S: ObjectStore> Reconciler<S> {
    /// Reconciles a CloudMachine resource.
    pub async fn reconcile_machine(&self, machine: &CloudMachine) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(machine)?;
        info!("Reconciling CloudMachine {}/{}", namespace, name);

        if is_deleting(machine) {
            return self.delete_machine(machine).await;
        }

        if !has_finalizer(machine, MACHINE_FINALIZER) {
            let mut updated = machine.clone();
            add_finalizer(&mut updated, MACHINE_FINALIZER);
            self.store.replace(&updated).await?;
            debug!("Added finalizer to CloudMachine {}/{}", namespace, name);
            return Ok(Action::requeue(REQUEUE_AFTER_FINALIZER));
        }

        if machine.status.as_ref().is_some_and(|s| s.failure_reason.is_some()) {
            debug!("CloudMachine {}/{} has failed, nothing to do", namespace, name);
            return Ok(Action::await_change());
        }

        let mut updated = machine.clone();
        let result = self.converge_machine(&mut updated, &namespace, &name).await;
        self.write_status(machine, &updated).await?;
        result
    }

    async fn converge_machine(
        &self,
        machine: &mut CloudMachine,
        namespace: &str,
        name: &str,
    ) -> Result<Action, ControllerError> {
        let snapshot = machine.clone();
        let status = machine.status.get_or_insert_with(Default::default);

        let Some(cluster_name) = snapshot.labels().get(CLUSTER_NAME_LABEL).cloned() else {
            let message = format!("CloudMachine {namespace}/{name} has no {CLUSTER_NAME_LABEL} label");
            set_condition(
                &mut status.conditions,
                Condition::false_(
                    types::READY,
                    reasons::INVALID_CONFIGURATION,
                    ConditionSeverity::Error,
                    message.clone(),
                ),
            );
            return Err(ControllerError::InvalidConfig(message));
        };

        let cluster = self.store.get::<CloudCluster>(namespace, &cluster_name).await?;
        let Some(cluster) = cluster.filter(|c| c.status.as_ref().is_some_and(|s| s.ready)) else {
            waiting(
                status,
                reasons::WAITING_FOR_CLUSTER,
                format!("waiting for cluster {cluster_name} infrastructure"),
            );
            return Ok(Action::requeue(REQUEUE_DEPENDENCY));
        };

        let bootstrap = match &snapshot.spec.bootstrap_data_secret {
            Some(secret) => self
                .store
                .get::<Secret>(namespace, secret)
                .await?
                .map(|_| secret.clone()),
            None => None,
        };
        let Some(bootstrap) = bootstrap else {
            waiting(status, reasons::WAITING_FOR_BOOTSTRAP_DATA, "waiting for bootstrap data");
            return Ok(Action::requeue(REQUEUE_DEPENDENCY));
        };

        let server = match self.store.get::<CloudServer>(namespace, name).await? {
            Some(server) => server,
            None => {
                self.create_machine_server(&snapshot, &cluster, namespace, name, &bootstrap)
                    .await?;
                waiting(status, reasons::WAITING_FOR_SERVER, "server created");
                return Ok(Action::requeue(REQUEUE_DEPENDENCY));
            }
        };

        let server_status = server.status.clone().unwrap_or_default();
        project_server_status(status, &server_status);
        status.failure_domain = server.spec.template.availability_zone.clone();

        if let Some(reason) = &server_status.failure_reason {
            warn!("Server of CloudMachine {}/{} failed: {}", namespace, name, reason);
            let message = server_status.failure_message.clone().unwrap_or_default();
            status.ready = false;
            status.failure_reason = Some(reason.clone());
            status.failure_message = Some(message.clone());
            set_condition(
                &mut status.conditions,
                Condition::false_(types::INSTANCE_READY, reason, ConditionSeverity::Error, message.clone()),
            );
            set_condition(
                &mut status.conditions,
                Condition::false_(types::READY, reason, ConditionSeverity::Error, message),
            );
            return Ok(Action::await_change());
        }

        if !server_status.ready {
            waiting(status, reasons::WAITING_FOR_SERVER, "waiting for the server to become ready");
            return Ok(Action::requeue(REQUEUE_DEPENDENCY));
        }
        set_condition(&mut status.conditions, Condition::true_(types::INSTANCE_READY));

        if is_control_plane(&snapshot) {
            let address = server_status
                .addresses
                .iter()
                .find(|a| a.type_ == "InternalIP")
                .map(|a| a.address.clone());
            let Some(address) = address else {
                waiting(status, reasons::WAITING_FOR_SERVER, "server has no internal address yet");
                return Ok(Action::requeue(REQUEUE_DEPENDENCY));
            };

            if cluster.spec.load_balancer_enabled() {
                let joined = self
                    .reconcile_load_balancer_members(&cluster, namespace, &cluster_name, name, &address)
                    .await?;
                if !joined {
                    waiting(
                        status,
                        reasons::LOAD_BALANCER_PROVISIONING,
                        "waiting for the API server load balancer",
                    );
                    return Ok(Action::requeue(REQUEUE_LOAD_BALANCER));
                }
            } else if let Some(fip_address) = cluster.status.as_ref().and_then(|s| s.api_server_floating_ip.clone()) {
                self.associate_api_floating_ip(&server_status, &cluster, &fip_address).await?;
            }
        }

        status.ready = true;
        set_condition(&mut status.conditions, Condition::true_(types::READY));
        info!("CloudMachine {}/{} is ready", namespace, name);
        Ok(Action::await_change())
    }

    async fn create_machine_server(
        &self,
        machine: &CloudMachine,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        bootstrap_secret: &str,
    ) -> Result<(), ControllerError> {
        let cluster_status = cluster.status.clone().unwrap_or_default();
        let control_plane = is_control_plane(machine);

        let mut template = machine.spec.template.clone();
        let group = if control_plane {
            cluster_status.control_plane_security_group
        } else {
            cluster_status.worker_security_group
        };
        if let Some(group) = group {
            template.security_groups.push(SecurityGroupParam::by_id(group.id));
        }
        if control_plane && cluster.spec.control_plane_omit_availability_zone {
            template.availability_zone = None;
        } else if let Some(zone) = &machine.spec.failure_domain {
            template.availability_zone = Some(zone.clone());
        }

        let mut server = CloudServer::new(
            name,
            CloudServerSpec {
                template,
                user_data_ref: Some(bootstrap_secret.to_string()),
                cluster_network: cluster_status.network.map(|n| NetworkParam::by_id(n.id)),
            },
        );
        server.metadata.namespace = Some(namespace.to_string());
        server.metadata.owner_references = Some(vec![owner_reference(machine)?]);
        let labels: BTreeMap<String, String> = machine
            .labels()
            .iter()
            .filter(|(k, _)| k.as_str() == CLUSTER_NAME_LABEL || k.as_str() == CONTROL_PLANE_LABEL)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        server.metadata.labels = Some(labels);

        self.store.create(namespace, &server).await?;
        info!("Created CloudServer {}/{} for machine", namespace, name);
        Ok(())
    }

    /// Point the cluster's API floating IP at this control-plane node
    async fn associate_api_floating_ip(
        &self,
        server: &CloudServerStatus,
        cluster: &CloudCluster,
        address: &str,
    ) -> Result<(), ControllerError> {
        let network_id = cluster
            .status
            .as_ref()
            .and_then(|s| s.network.as_ref())
            .map(|n| n.id.clone())
            .unwrap_or_default();
        let Some(instance_id) = &server.instance_id else {
            return Ok(());
        };
        let Some(port) = self
            .cloud
            .get_management_port(instance_id, &network_id)
            .await
            .with_op(|| format!("get management port of {instance_id}"))?
        else {
            return Err(ControllerError::NotFound(format!(
                "port of instance {instance_id} on network {network_id}"
            )));
        };
        let fip = self
            .find_floating_ip(address)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("floating IP {address}")))?;
        // the first control-plane node to come up keeps the address
        if fip.port_id.is_some() {
            return Ok(());
        }
        self.ensure_floating_ip_association(&fip, &port.id).await
    }

    /// Remove load-balancer membership, delete the server, wait for it, then
    /// drop the finalizer
    async fn delete_machine(&self, machine: &CloudMachine) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(machine)?;
        if !has_finalizer(machine, MACHINE_FINALIZER) {
            return Ok(Action::await_change());
        }
        info!("Deleting CloudMachine {}/{}", namespace, name);

        if is_control_plane(machine) {
            if let Some(cluster_name) = machine.labels().get(CLUSTER_NAME_LABEL) {
                if let Some(cluster) = self.store.get::<CloudCluster>(&namespace, cluster_name).await? {
                    if cluster.spec.load_balancer_enabled() {
                        self.delete_load_balancer_members(&cluster, &namespace, cluster_name, &name)
                            .await?;
                    }
                }
            }
        }

        if self.store.get::<CloudServer>(&namespace, &name).await?.is_some() {
            self.store.delete::<CloudServer>(&namespace, &name).await?;
            if self.store.get::<CloudServer>(&namespace, &name).await?.is_some() {
                let mut updated = machine.clone();
                let status = updated.status.get_or_insert_with(Default::default);
                status.ready = false;
                set_condition(
                    &mut status.conditions,
                    Condition::false_(
                        types::READY,
                        reasons::DELETING,
                        ConditionSeverity::Info,
                        "waiting for the server to be deleted",
                    ),
                );
                self.write_status(machine, &updated).await?;
                return Ok(Action::requeue(REQUEUE_DEPENDENCY));
            }
        }

        let mut updated = machine.clone();
        remove_finalizer(&mut updated, MACHINE_FINALIZER);
        self.store.replace(&updated).await?;
        info!("CloudMachine {}/{} deleted", namespace, name);
        Ok(Action::await_change())
    }
}
