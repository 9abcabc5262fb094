//! CloudServer reconciliation.
//!
//! A pass goes resolve → persist finalizer and resolved spec → requeue → adopt →
//! create what is missing → follow the instance state. Provider resources get
//! deterministic names, so anything created by an interrupted pass is found by
//! name and adopted instead of created twice.

use super::naming;
use super::{
    REQUEUE_AFTER_FINALIZER, REQUEUE_DEPENDENCY, REQUEUE_INSTANCE_BUILD, REQUEUE_INSTANCE_OTHER, Reconciler,
    add_finalizer, has_finalizer, ignore_not_found, is_deleting, namespaced_name, owner_reference, remove_finalizer,
};
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use cloud_client::{
    BlockDeviceMapping, CreateInstanceRequest, CreatePortRequest, CreateTrunkRequest, CreateVolumeRequest, FixedIp,
    Instance, TaggedResource,
};
use crds::conditions::{reasons, set_condition, types};
use crds::{
    CloudServer, CloudServerStatus, Condition, ConditionSeverity, IPAddress, IPAddressClaim, IPAddressClaimSpec,
    InstanceState, NodeAddress, ObjectReference, PortOpts, PortStatus, ResolvedFixedIp, ResolvedPortSpec,
    ResolvedServerSpec, ResolvedVolumeSpec, SERVER_FINALIZER, ServerResources, VolumeStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

const INTERNAL_IP: &str = "InternalIP";
const EXTERNAL_IP: &str = "ExternalIP";

/// Provider resources found for a server before anything is created
#[derive(Debug, Default)]
struct Adopted {
    /// One entry per resolved port, `None` when absent at the provider
    ports: Vec<Option<PortStatus>>,
    /// One entry per resolved volume
    volumes: Vec<Option<VolumeStatus>>,
    instance: Option<Instance>,
}

fn node_addresses(instance: &Instance) -> Vec<NodeAddress> {
    instance
        .addresses
        .values()
        .flatten()
        .map(|a| NodeAddress {
            type_: if a.ip_type.as_deref() == Some("floating") {
                EXTERNAL_IP.to_string()
            } else {
                INTERNAL_IP.to_string()
            },
            address: a.addr.clone(),
        })
        .collect()
}

/// InstanceReady and Ready both False
fn set_not_ready(status: &mut CloudServerStatus, reason: &str, severity: ConditionSeverity, message: &str) {
    status.ready = false;
    set_condition(
        &mut status.conditions,
        Condition::false_(types::INSTANCE_READY, reason, severity, message),
    );
    set_condition(
        &mut status.conditions,
        Condition::false_(types::READY, reason, severity, message),
    );
}

/// Terminal failure; the server is never re-created, deletion still runs
fn set_failed(status: &mut CloudServerStatus, reason: &str, message: String) {
    set_not_ready(status, reason, ConditionSeverity::Error, &message);
    status.failure_reason = Some(reason.to_string());
    status.failure_message = Some(message);
}

impl<S: ObjectStore> Reconciler<S> {
    /// Reconciles a CloudServer resource.
    pub async fn reconcile_server(&self, server: &CloudServer) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(server)?;
        info!("Reconciling CloudServer {}/{}", namespace, name);

        if is_deleting(server) {
            return self.delete_server(server).await;
        }

        if let Some(reason) = server.status.as_ref().and_then(|s| s.failure_reason.as_ref()) {
            debug!("CloudServer {}/{} has failed ({}), nothing to do", namespace, name, reason);
            return Ok(Action::await_change());
        }

        let resolved = server
            .status
            .as_ref()
            .and_then(|s| s.resolved.clone())
            .filter(|_| has_finalizer(server, SERVER_FINALIZER));
        let Some(resolved) = resolved else {
            return self.persist_resolved_spec(server).await;
        };

        let mut updated = server.clone();
        let result = self.converge_server(&mut updated, &resolved).await;
        self.write_status(server, &updated).await?;
        result
    }

    /// Resolve the spec once and persist it together with the finalizer.
    ///
    /// Nothing is created at the provider in this pass.
    async fn persist_resolved_spec(&self, server: &CloudServer) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(server)?;
        let resolved = match server.status.as_ref().and_then(|s| s.resolved.clone()) {
            Some(resolved) => resolved,
            None => match self.resolve_server_spec(server).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    let severity = match e {
                        ControllerError::InvalidConfig(_) => ConditionSeverity::Error,
                        _ => ConditionSeverity::Warning,
                    };
                    let mut updated = server.clone();
                    let status = updated.status.get_or_insert_with(Default::default);
                    set_not_ready(status, reasons::RESOLVE_FAILED, severity, &e.to_string());
                    self.write_status(server, &updated).await?;
                    return Err(e);
                }
            },
        };

        let mut persisted = server.clone();
        if add_finalizer(&mut persisted, SERVER_FINALIZER) {
            persisted = self.store.replace(&persisted).await?;
        }
        let mut updated = persisted.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        status.resolved = Some(resolved);
        set_not_ready(
            status,
            reasons::INSTANCE_BUILDING,
            ConditionSeverity::Info,
            "resolved server spec, creating resources",
        );
        self.write_status(&persisted, &updated).await?;
        info!("Persisted resolved spec for CloudServer {}/{}", namespace, name);
        Ok(Action::requeue(REQUEUE_AFTER_FINALIZER))
    }

    /// Turn symbolic references into provider IDs
    async fn resolve_server_spec(&self, server: &CloudServer) -> Result<ResolvedServerSpec, ControllerError> {
        let (namespace, name) = namespaced_name(server)?;
        let template = &server.spec.template;

        let image = self.resolve_image(&template.image).await?;
        let flavor = self.resolve_flavor(&template.flavor).await?;

        let mut default_groups = Vec::new();
        for group in &template.security_groups {
            default_groups.push(self.resolve_security_group(group).await?.id);
        }

        let requested = if template.ports.is_empty() {
            vec![PortOpts::default()]
        } else {
            template.ports.clone()
        };

        let mut ports = Vec::with_capacity(requested.len());
        for (index, port) in requested.iter().enumerate() {
            let network_param = port
                .network
                .as_ref()
                .or(server.spec.cluster_network.as_ref())
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "port {index} of {namespace}/{name} names no network and there is no cluster network"
                    ))
                })?;
            let network = self.resolve_network(network_param).await?;

            let mut fixed_ips = Vec::with_capacity(port.fixed_ips.len());
            for fixed in &port.fixed_ips {
                let subnet_id = match &fixed.subnet {
                    Some(subnet) => Some(self.resolve_subnet(subnet, Some(&network.id)).await?.id),
                    None => None,
                };
                fixed_ips.push(ResolvedFixedIp {
                    subnet_id,
                    ip_address: fixed.ip_address.clone(),
                });
            }

            let security_group_ids = if port.security_groups.is_empty() {
                default_groups.clone()
            } else {
                let mut ids = Vec::with_capacity(port.security_groups.len());
                for group in &port.security_groups {
                    ids.push(self.resolve_security_group(group).await?.id);
                }
                ids
            };

            ports.push(ResolvedPortSpec {
                name: naming::port_name(&name, index, port.name_suffix.as_deref()),
                network_id: network.id,
                description: port
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Created for CloudServer {namespace}/{name}")),
                fixed_ips,
                security_group_ids,
                trunk: port.trunk.unwrap_or(template.trunk),
                tags: template.tags.clone(),
            });
        }

        let mut volumes = Vec::new();
        if let Some(root) = &template.root_volume {
            volumes.push(ResolvedVolumeSpec {
                name: naming::root_volume_name(&name),
                size_gib: root.size_gib,
                volume_type: root.volume_type.clone(),
                availability_zone: root
                    .availability_zone
                    .clone()
                    .or_else(|| template.availability_zone.clone()),
                boot: true,
            });
        }
        for device in &template.additional_block_devices {
            volumes.push(ResolvedVolumeSpec {
                name: naming::block_device_volume_name(&name, &device.name),
                size_gib: device.size_gib,
                volume_type: device.volume_type.clone(),
                availability_zone: device
                    .availability_zone
                    .clone()
                    .or_else(|| template.availability_zone.clone()),
                boot: false,
            });
        }

        Ok(ResolvedServerSpec {
            image_id: image.id,
            flavor_id: flavor.id,
            ports,
            volumes,
        })
    }

    /// Find provider resources of the server by recorded ID or deterministic name
    async fn adopt_server_resources(
        &self,
        name: &str,
        resolved: &ResolvedServerSpec,
        status: &CloudServerStatus,
    ) -> Result<Adopted, ControllerError> {
        let known = status.resources.clone().unwrap_or_default();
        let mut adopted = Adopted::default();

        for (index, spec) in resolved.ports.iter().enumerate() {
            if let Some(port) = known.ports.get(index) {
                adopted.ports.push(Some(port.clone()));
                continue;
            }
            let found = self
                .cloud
                .list_ports(&[("name", spec.name.as_str()), ("network_id", spec.network_id.as_str())])
                .await
                .with_op(|| format!("list ports {}", spec.name))?;
            let Some(port) = found.into_iter().next() else {
                adopted.ports.push(None);
                continue;
            };
            let trunk_id = if spec.trunk {
                self.find_trunk(&port.id).await?
            } else {
                None
            };
            info!("Adopted port {} ({}) of server {}", spec.name, port.id, name);
            adopted.ports.push(Some(PortStatus { id: port.id, trunk_id }));
        }

        for spec in &resolved.volumes {
            if let Some(volume) = known.volumes.iter().find(|v| v.name == spec.name) {
                adopted.volumes.push(Some(volume.clone()));
                continue;
            }
            let found = self
                .cloud
                .list_volumes(&[("name", spec.name.as_str())])
                .await
                .with_op(|| format!("list volumes {}", spec.name))?;
            adopted.volumes.push(found.into_iter().next().map(|v| {
                info!("Adopted volume {} ({}) of server {}", spec.name, v.id, name);
                VolumeStatus {
                    name: spec.name.clone(),
                    id: v.id,
                }
            }));
        }

        adopted.instance = match &status.instance_id {
            Some(id) => self
                .cloud
                .get_instance(id)
                .await
                .with_op(|| format!("get instance {id}"))?,
            None => {
                let found = self
                    .cloud
                    .list_instances(&[("name", name)])
                    .await
                    .with_op(|| format!("list instances {name}"))?;
                let instance = found.into_iter().next();
                if let Some(instance) = &instance {
                    info!("Adopted instance {} of server {}", instance.id, name);
                }
                instance
            }
        };

        Ok(adopted)
    }

    async fn find_trunk(&self, port_id: &str) -> Result<Option<String>, ControllerError> {
        let trunks = self
            .cloud
            .list_trunks(&[("port_id", port_id)])
            .await
            .with_op(|| format!("list trunks of port {port_id}"))?;
        Ok(trunks.into_iter().next().map(|t| t.id))
    }

    async fn create_server_port(&self, spec: &ResolvedPortSpec) -> Result<PortStatus, ControllerError> {
        let port = self
            .cloud
            .create_port(CreatePortRequest {
                name: spec.name.clone(),
                network_id: spec.network_id.clone(),
                description: spec.description.clone(),
                fixed_ips: spec
                    .fixed_ips
                    .iter()
                    .map(|ip| FixedIp {
                        subnet_id: ip.subnet_id.clone(),
                        ip_address: ip.ip_address.clone(),
                    })
                    .collect(),
                security_group_ids: spec.security_group_ids.clone(),
            })
            .await
            .with_op(|| format!("create port {}", spec.name))?;
        info!("Created port {} ({})", spec.name, port.id);

        for tag in &spec.tags {
            self.cloud
                .add_tag(TaggedResource::Port, &port.id, tag)
                .await
                .with_op(|| format!("tag port {}", spec.name))?;
        }

        Ok(PortStatus {
            id: port.id,
            trunk_id: None,
        })
    }

    async fn ensure_trunk(&self, spec: &ResolvedPortSpec, port: &mut PortStatus) -> Result<(), ControllerError> {
        if !spec.trunk || port.trunk_id.is_some() {
            return Ok(());
        }
        if let Some(id) = self.find_trunk(&port.id).await? {
            port.trunk_id = Some(id);
            return Ok(());
        }
        let trunk = self
            .cloud
            .create_trunk(CreateTrunkRequest {
                name: spec.name.clone(),
                port_id: port.id.clone(),
            })
            .await
            .with_op(|| format!("create trunk {}", spec.name))?;
        info!("Created trunk {} ({})", spec.name, trunk.id);
        port.trunk_id = Some(trunk.id);
        Ok(())
    }

    async fn create_server_volume(
        &self,
        spec: &ResolvedVolumeSpec,
        image_id: &str,
    ) -> Result<VolumeStatus, ControllerError> {
        let volume = self
            .cloud
            .create_volume(CreateVolumeRequest {
                name: spec.name.clone(),
                size: spec.size_gib,
                volume_type: spec.volume_type.clone(),
                availability_zone: spec.availability_zone.clone(),
                image_id: spec.boot.then(|| image_id.to_string()),
                description: String::new(),
            })
            .await
            .with_op(|| format!("create volume {}", spec.name))?;
        info!("Created volume {} ({})", spec.name, volume.id);
        Ok(VolumeStatus {
            name: spec.name.clone(),
            id: volume.id,
        })
    }

    /// Drive a server with a persisted resolved spec toward an ACTIVE instance
    async fn converge_server(
        &self,
        server: &mut CloudServer,
        resolved: &ResolvedServerSpec,
    ) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(server)?;
        let owner = owner_reference(server)?;
        let template = server.spec.template.clone();
        let user_data_ref = server.spec.user_data_ref.clone();
        let status = server.status.get_or_insert_with(Default::default);

        let adopted = self.adopt_server_resources(&name, resolved, status).await?;

        let mut ports = Vec::with_capacity(resolved.ports.len());
        for (spec, known) in resolved.ports.iter().zip(adopted.ports) {
            let port = match known {
                Some(port) => Ok(port),
                None => self.create_server_port(spec).await,
            };
            let mut port = match port {
                Ok(port) => port,
                Err(e) => {
                    set_not_ready(status, reasons::PORT_CREATE_FAILED, ConditionSeverity::Warning, &e.to_string());
                    return Err(e);
                }
            };
            if let Err(e) = self.ensure_trunk(spec, &mut port).await {
                set_not_ready(status, reasons::PORT_CREATE_FAILED, ConditionSeverity::Warning, &e.to_string());
                return Err(e);
            }
            ports.push(port);
        }

        let mut volumes = Vec::with_capacity(resolved.volumes.len());
        for (spec, known) in resolved.volumes.iter().zip(adopted.volumes) {
            let volume = match known {
                Some(volume) => volume,
                None => match self.create_server_volume(spec, &resolved.image_id).await {
                    Ok(volume) => volume,
                    Err(e) => {
                        set_not_ready(
                            status,
                            reasons::VOLUME_CREATE_FAILED,
                            ConditionSeverity::Warning,
                            &e.to_string(),
                        );
                        return Err(e);
                    }
                },
            };
            volumes.push(volume);
        }
        status.resources = Some(ServerResources {
            ports: ports.clone(),
            volumes: volumes.clone(),
        });

        if let Some(pool_ref) = &template.floating_ip_pool_ref {
            self.ensure_floating_ip_claim(&namespace, &name, pool_ref, owner).await?;
        }

        let instance = match adopted.instance {
            Some(instance) => Some(instance),
            // recorded once, now gone at the provider
            None if status.instance_id.is_some() => None,
            None => {
                let user_data = match &user_data_ref {
                    Some(secret) => match self.read_secret_value(&namespace, secret).await? {
                        Some(value) => Some(value),
                        None => {
                            set_not_ready(
                                status,
                                reasons::WAITING_FOR_BOOTSTRAP_DATA,
                                ConditionSeverity::Info,
                                &format!("waiting for user data secret {secret}"),
                            );
                            return Ok(Action::requeue(REQUEUE_DEPENDENCY));
                        }
                    },
                    None => None,
                };

                let boot_volume = resolved
                    .volumes
                    .iter()
                    .zip(&volumes)
                    .find(|(spec, _)| spec.boot)
                    .map(|(_, volume)| volume.id.clone());
                let mut block_devices = Vec::new();
                if let Some(id) = &boot_volume {
                    block_devices.push(BlockDeviceMapping::volume(id, 0));
                }
                for (spec, volume) in resolved.volumes.iter().zip(&volumes) {
                    if !spec.boot {
                        block_devices.push(BlockDeviceMapping::volume(&volume.id, -1));
                    }
                }

                let request = CreateInstanceRequest {
                    name: name.clone(),
                    image_id: if boot_volume.is_some() {
                        String::new()
                    } else {
                        resolved.image_id.clone()
                    },
                    flavor_id: resolved.flavor_id.clone(),
                    port_ids: ports.iter().map(|p| p.id.clone()).collect(),
                    key_name: template.ssh_key_name.clone(),
                    user_data,
                    metadata: template.server_metadata.clone(),
                    config_drive: template.config_drive,
                    availability_zone: template.availability_zone.clone(),
                    block_devices,
                    tags: template.tags.clone(),
                };
                match self.cloud.create_instance(request).await.with_op(|| format!("create instance {name}")) {
                    Ok(instance) => {
                        info!("Created instance {} for CloudServer {}/{}", instance.id, namespace, name);
                        Some(instance)
                    }
                    Err(e) => {
                        set_not_ready(
                            status,
                            reasons::INSTANCE_CREATE_FAILED,
                            ConditionSeverity::Warning,
                            &e.to_string(),
                        );
                        return Err(e);
                    }
                }
            }
        };

        let state = instance
            .as_ref()
            .map_or(InstanceState::Deleted, |i| InstanceState::from_provider(&i.status));
        if let Some(instance) = &instance {
            status.instance_id = Some(instance.id.clone());
            status.addresses = node_addresses(instance);
        }
        status.instance_state = Some(state.clone());

        match state {
            InstanceState::Build | InstanceState::Undefined => {
                set_not_ready(
                    status,
                    reasons::INSTANCE_BUILDING,
                    ConditionSeverity::Info,
                    "instance is building",
                );
                Ok(Action::requeue(REQUEUE_INSTANCE_BUILD))
            }
            InstanceState::Active => {
                let instance_id = status.instance_id.clone().unwrap_or_default();
                if template.floating_ip_pool_ref.is_some() {
                    let Some(port) = ports.first() else {
                        return Err(ControllerError::InvalidConfig(format!(
                            "CloudServer {namespace}/{name} has no port for its floating IP"
                        )));
                    };
                    match self.associate_pool_floating_ip(&namespace, &name, &port.id).await {
                        Ok(Some(address)) => {
                            status.floating_ip = Some(address);
                            set_condition(
                                &mut status.conditions,
                                Condition::true_(types::FLOATING_ADDRESS_READY),
                            );
                            if let Some(refreshed) = self
                                .cloud
                                .get_instance(&instance_id)
                                .await
                                .with_op(|| format!("get instance {instance_id}"))?
                            {
                                status.addresses = node_addresses(&refreshed);
                            }
                        }
                        Ok(None) => {
                            status.ready = false;
                            set_condition(
                                &mut status.conditions,
                                Condition::false_(
                                    types::FLOATING_ADDRESS_READY,
                                    reasons::WAITING_FOR_IP_ADDRESS,
                                    ConditionSeverity::Info,
                                    "waiting for an address from the floating IP pool",
                                ),
                            );
                            return Ok(Action::requeue(REQUEUE_DEPENDENCY));
                        }
                        Err(e) => {
                            status.ready = false;
                            set_condition(
                                &mut status.conditions,
                                Condition::false_(
                                    types::FLOATING_ADDRESS_READY,
                                    reasons::FLOATING_IP_ERROR,
                                    ConditionSeverity::Warning,
                                    e.to_string(),
                                ),
                            );
                            return Err(e);
                        }
                    }
                }

                status.ready = true;
                set_condition(&mut status.conditions, Condition::true_(types::INSTANCE_READY));
                set_condition(&mut status.conditions, Condition::true_(types::READY));
                info!("CloudServer {}/{} is ready (instance {})", namespace, name, instance_id);
                Ok(Action::await_change())
            }
            InstanceState::Error => {
                warn!("Instance of CloudServer {}/{} is in ERROR state", namespace, name);
                let message = format!(
                    "instance {} is in ERROR state",
                    status.instance_id.as_deref().unwrap_or_default()
                );
                set_failed(status, reasons::INSTANCE_STATE_ERROR, message);
                Ok(Action::await_change())
            }
            InstanceState::Deleted => {
                warn!("Instance of CloudServer {}/{} was deleted", namespace, name);
                let message = format!(
                    "instance {} was deleted outside the controller",
                    status.instance_id.as_deref().unwrap_or_default()
                );
                set_failed(status, reasons::INSTANCE_DELETED, message);
                Ok(Action::await_change())
            }
            InstanceState::Other(provider_state) => {
                status.ready = false;
                let message = format!("instance is {provider_state}");
                set_condition(
                    &mut status.conditions,
                    Condition::unknown(types::INSTANCE_READY, reasons::INSTANCE_NOT_READY, message.clone()),
                );
                set_condition(
                    &mut status.conditions,
                    Condition::unknown(types::READY, reasons::INSTANCE_NOT_READY, message),
                );
                Ok(Action::requeue(REQUEUE_INSTANCE_OTHER))
            }
        }
    }

    async fn ensure_floating_ip_claim(
        &self,
        namespace: &str,
        server: &str,
        pool_ref: &ObjectReference,
        owner: OwnerReference,
    ) -> Result<(), ControllerError> {
        let claim_name = naming::floating_ip_claim_name(server);
        if self
            .store
            .get::<IPAddressClaim>(namespace, &claim_name)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let mut claim = IPAddressClaim::new(
            &claim_name,
            IPAddressClaimSpec {
                pool_ref: pool_ref.clone(),
            },
        );
        claim.metadata.namespace = Some(namespace.to_string());
        claim.metadata.owner_references = Some(vec![owner]);
        self.store.create(namespace, &claim).await?;
        info!("Created IPAddressClaim {}/{} on pool {}", namespace, claim_name, pool_ref.name);
        Ok(())
    }

    /// Associate the claimed pool address with `port_id`; `None` while the claim is pending
    async fn associate_pool_floating_ip(
        &self,
        namespace: &str,
        server: &str,
        port_id: &str,
    ) -> Result<Option<String>, ControllerError> {
        let claim_name = naming::floating_ip_claim_name(server);
        let Some(claim) = self.store.get::<IPAddressClaim>(namespace, &claim_name).await? else {
            return Ok(None);
        };
        let Some(address_ref) = claim.status.and_then(|s| s.address_ref) else {
            return Ok(None);
        };
        let Some(record) = self.store.get::<IPAddress>(namespace, &address_ref.name).await? else {
            return Ok(None);
        };
        let address = record.spec.address;

        let fip = self
            .find_floating_ip(&address)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("floating IP {address}")))?;
        if fip.port_id.as_deref() != Some(port_id) {
            self.cloud
                .associate_floating_ip(&fip.id, port_id)
                .await
                .with_op(|| format!("associate floating IP {address}"))?;
            info!("Associated floating IP {} with port {} of {}", address, port_id, server);
        }
        Ok(Some(address))
    }

    /// Tear down in dependency order: trunk and port, instance, volumes, claim
    async fn delete_server(&self, server: &CloudServer) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(server)?;
        if !has_finalizer(server, SERVER_FINALIZER) {
            return Ok(Action::await_change());
        }
        info!("Deleting CloudServer {}/{}", namespace, name);

        let status = server.status.clone().unwrap_or_default();
        // without a resolved spec nothing was ever created
        if let Some(resolved) = &status.resolved {
            let adopted = self.adopt_server_resources(&name, resolved, &status).await?;

            for (spec, port) in resolved.ports.iter().zip(&adopted.ports) {
                let Some(port) = port else { continue };
                let trunk_id = match &port.trunk_id {
                    Some(id) => Some(id.clone()),
                    None if spec.trunk => self.find_trunk(&port.id).await?,
                    None => None,
                };
                if let Some(trunk_id) = trunk_id {
                    ignore_not_found(self.cloud.delete_trunk(&trunk_id).await)
                        .with_op(|| format!("delete trunk {trunk_id}"))?;
                }
                ignore_not_found(self.cloud.delete_port(&port.id).await)
                    .with_op(|| format!("delete port {}", spec.name))?;
                info!("Deleted port {} of {}", spec.name, name);
            }

            if let Some(instance) = &adopted.instance {
                ignore_not_found(self.cloud.delete_instance(&instance.id).await)
                    .with_op(|| format!("delete instance {}", instance.id))?;
                let remaining = self
                    .cloud
                    .get_instance(&instance.id)
                    .await
                    .with_op(|| format!("get instance {}", instance.id))?;
                if remaining.is_some() {
                    info!("Waiting for instance {} of {} to go away", instance.id, name);
                    return Ok(Action::requeue(REQUEUE_DEPENDENCY));
                }
            }

            for volume in adopted.volumes.iter().flatten() {
                ignore_not_found(self.cloud.delete_volume(&volume.id).await)
                    .with_op(|| format!("delete volume {}", volume.name))?;
                info!("Deleted volume {} of {}", volume.name, name);
            }

            if server.spec.template.floating_ip_pool_ref.is_some() {
                self.store
                    .delete::<IPAddressClaim>(&namespace, &naming::floating_ip_claim_name(&name))
                    .await?;
            }
        }

        let mut updated = server.clone();
        remove_finalizer(&mut updated, SERVER_FINALIZER);
        self.store.replace(&updated).await?;
        info!("CloudServer {}/{} deleted", namespace, name);
        Ok(Action::await_change())
    }
}
