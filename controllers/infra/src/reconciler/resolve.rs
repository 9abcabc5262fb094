//! Resolution of symbolic provider parameters to concrete resources.
//!
//! A parameter must match exactly one provider resource. No match is a
//! `NotFound` (the resource may appear later), more than one is a configuration
//! error (retrying cannot fix it).

use super::Reconciler;
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use cloud_client::{Flavor, Image, Network, Router, SecurityGroup, Subnet};
use crds::{ImageParam, NetworkParam, RouterParam, SecurityGroupParam, SubnetParam};

fn exactly_one<T>(mut items: Vec<T>, what: &str) -> Result<T, ControllerError> {
    match items.len() {
        0 => Err(ControllerError::NotFound(what.to_string())),
        1 => Ok(items.remove(0)),
        n => Err(ControllerError::InvalidConfig(format!("{what} matches {n} resources"))),
    }
}

impl<S: ObjectStore> Reconciler<S> {
    pub(crate) async fn resolve_network(&self, param: &NetworkParam) -> Result<Network, ControllerError> {
        if let Some(id) = &param.id {
            return self
                .cloud
                .get_network(id)
                .await
                .with_op(|| format!("get network {id}"))?
                .ok_or_else(|| ControllerError::NotFound(format!("network {id}")));
        }
        if param.is_empty() {
            return Err(ControllerError::InvalidConfig("empty network parameter".to_string()));
        }
        let tags = param.tags.join(",");
        let mut filters: Vec<(&str, &str)> = Vec::new();
        if let Some(name) = &param.name {
            filters.push(("name", name.as_str()));
        }
        if !tags.is_empty() {
            filters.push(("tags", tags.as_str()));
        }
        let networks = self.cloud.list_networks(&filters).await.op("list networks")?;
        exactly_one(networks, &format!("network {param:?}"))
    }

    pub(crate) async fn resolve_subnet(
        &self,
        param: &SubnetParam,
        network_id: Option<&str>,
    ) -> Result<Subnet, ControllerError> {
        let mut filters: Vec<(&str, &str)> = Vec::new();
        if let Some(id) = &param.id {
            filters.push(("id", id.as_str()));
        }
        if let Some(name) = &param.name {
            filters.push(("name", name.as_str()));
        }
        if let Some(cidr) = &param.cidr {
            filters.push(("cidr", cidr.as_str()));
        }
        if let Some(network_id) = network_id {
            filters.push(("network_id", network_id));
        }
        if filters.is_empty() {
            return Err(ControllerError::InvalidConfig("empty subnet parameter".to_string()));
        }
        let subnets = self.cloud.list_subnets(&filters).await.op("list subnets")?;
        exactly_one(subnets, &format!("subnet {param:?}"))
    }

    pub(crate) async fn resolve_router(&self, param: &RouterParam) -> Result<Router, ControllerError> {
        let mut filters: Vec<(&str, &str)> = Vec::new();
        if let Some(id) = &param.id {
            filters.push(("id", id.as_str()));
        }
        if let Some(name) = &param.name {
            filters.push(("name", name.as_str()));
        }
        if filters.is_empty() {
            return Err(ControllerError::InvalidConfig("empty router parameter".to_string()));
        }
        let routers = self.cloud.list_routers(&filters).await.op("list routers")?;
        exactly_one(routers, &format!("router {param:?}"))
    }

    pub(crate) async fn resolve_image(&self, param: &ImageParam) -> Result<Image, ControllerError> {
        if let Some(id) = &param.id {
            return self
                .cloud
                .get_image(id)
                .await
                .with_op(|| format!("get image {id}"))?
                .ok_or_else(|| ControllerError::NotFound(format!("image {id}")));
        }
        let Some(name) = &param.name else {
            return Err(ControllerError::InvalidConfig("image needs an id or a name".to_string()));
        };
        let images = self.cloud.list_images(&[("name", name.as_str())]).await.op("list images")?;
        exactly_one(images, &format!("image {name}"))
    }

    pub(crate) async fn resolve_flavor(&self, flavor: &str) -> Result<Flavor, ControllerError> {
        if flavor.is_empty() {
            return Err(ControllerError::InvalidConfig("flavor is required".to_string()));
        }
        let flavors = self.cloud.list_flavors().await.op("list flavors")?;
        let matching: Vec<Flavor> = flavors
            .into_iter()
            .filter(|f| f.name == flavor || f.id == flavor)
            .collect();
        exactly_one(matching, &format!("flavor {flavor}"))
    }

    pub(crate) async fn resolve_security_group(
        &self,
        param: &SecurityGroupParam,
    ) -> Result<SecurityGroup, ControllerError> {
        let mut filters: Vec<(&str, &str)> = Vec::new();
        if let Some(id) = &param.id {
            filters.push(("id", id.as_str()));
        }
        if let Some(name) = &param.name {
            filters.push(("name", name.as_str()));
        }
        if filters.is_empty() {
            return Err(ControllerError::InvalidConfig("empty security group parameter".to_string()));
        }
        let groups = self
            .cloud
            .list_security_groups(&filters)
            .await
            .op("list security groups")?;
        exactly_one(groups, &format!("security group {param:?}"))
    }
}
