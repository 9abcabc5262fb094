//! Compute, image and volume operations for MockCloudClient

use super::{MockCloudClient, MockState, matches};
use crate::error::CloudError;
use crate::models::*;
use crate::provider_trait::ComputeService;
use std::collections::BTreeMap;

/// Instance with addresses derived from its attached ports
fn with_addresses(state: &MockState, instance: &Instance) -> Instance {
    let mut addresses: BTreeMap<String, Vec<InstanceAddress>> = BTreeMap::new();
    for port in state.ports.iter().filter(|p| p.device_id == instance.id) {
        let network_name = state
            .networks
            .iter()
            .find(|n| n.id == port.network_id)
            .map_or_else(|| port.network_id.clone(), |n| n.name.clone());
        let entry = addresses.entry(network_name).or_default();
        for ip in port.fixed_ips.iter().filter_map(|ip| ip.ip_address.clone()) {
            entry.push(InstanceAddress {
                addr: ip,
                ip_type: Some("fixed".to_string()),
                version: Some(4),
            });
        }
        for fip in state
            .floating_ips
            .iter()
            .filter(|f| f.port_id.as_deref() == Some(port.id.as_str()))
        {
            entry.push(InstanceAddress {
                addr: fip.floating_ip_address.clone(),
                ip_type: Some("floating".to_string()),
                version: Some(4),
            });
        }
    }
    let mut instance = instance.clone();
    if !addresses.is_empty() {
        instance.addresses = addresses;
    }
    instance
}

#[async_trait::async_trait]
impl ComputeService for MockCloudClient {
    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, CloudError> {
        self.enter("get_instance", id)?;
        let state = self.state();
        Ok(state
            .instances
            .iter()
            .find(|i| i.id == id)
            .map(|i| with_addresses(&state, i)))
    }

    async fn list_instances(&self, filters: &[(&str, &str)]) -> Result<Vec<Instance>, CloudError> {
        self.enter("list_instances", "")?;
        let state = self.state();
        Ok(state
            .instances
            .iter()
            .filter(|i| matches(*i, filters))
            .map(|i| with_addresses(&state, i))
            .collect())
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<Instance, CloudError> {
        self.enter("create_instance", &request.name)?;
        let mut state = self.state();
        for port_id in &request.port_ids {
            if !state.ports.iter().any(|p| &p.id == port_id) {
                return Err(CloudError::NotFound(format!("port {port_id}")));
            }
        }
        let instance = Instance {
            id: Self::new_id("server"),
            name: request.name,
            status: state.new_instance_status.clone(),
            addresses: BTreeMap::new(),
            availability_zone: request.availability_zone,
            metadata: request.metadata,
            tags: request.tags,
        };
        for port in state
            .ports
            .iter_mut()
            .filter(|p| request.port_ids.contains(&p.id))
        {
            port.device_id = instance.id.clone();
            port.device_owner = "compute:nova".to_string();
        }
        state.instances.push(instance.clone());
        Ok(with_addresses(&state, &instance))
    }

    async fn delete_instance(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_instance", id)?;
        let mut state = self.state();
        state.instances.retain(|i| i.id != id);
        for port in state.ports.iter_mut().filter(|p| p.device_id == id) {
            port.device_id.clear();
            port.device_owner.clear();
        }
        Ok(())
    }

    async fn list_availability_zones(&self) -> Result<Vec<AvailabilityZone>, CloudError> {
        self.enter("list_availability_zones", "")?;
        Ok(self.state().availability_zones.clone())
    }

    async fn list_images(&self, filters: &[(&str, &str)]) -> Result<Vec<Image>, CloudError> {
        self.enter("list_images", "")?;
        Ok(self
            .state()
            .images
            .iter()
            .filter(|i| matches(*i, filters))
            .cloned()
            .collect())
    }

    async fn get_image(&self, id: &str) -> Result<Option<Image>, CloudError> {
        self.enter("get_image", id)?;
        Ok(self.state().images.iter().find(|i| i.id == id).cloned())
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, CloudError> {
        self.enter("list_flavors", "")?;
        Ok(self.state().flavors.clone())
    }

    async fn list_volumes(&self, filters: &[(&str, &str)]) -> Result<Vec<Volume>, CloudError> {
        self.enter("list_volumes", "")?;
        Ok(self
            .state()
            .volumes
            .iter()
            .filter(|v| matches(*v, filters))
            .cloned()
            .collect())
    }

    async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CloudError> {
        self.enter("create_volume", &request.name)?;
        let volume = Volume {
            id: Self::new_id("vol"),
            name: request.name,
            size: request.size,
            status: "available".to_string(),
            volume_type: request.volume_type,
            availability_zone: request.availability_zone,
        };
        self.state().volumes.push(volume.clone());
        Ok(volume)
    }

    async fn delete_volume(&self, id: &str) -> Result<(), CloudError> {
        self.enter("delete_volume", id)?;
        self.state().volumes.retain(|v| v.id != id);
        Ok(())
    }
}
