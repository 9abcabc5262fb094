//! Compute (`/servers`), image (`/v2/images`) and block storage (`/volumes`) APIs

use super::CloudClient;
use crate::common::HttpClient;
use crate::error::CloudError;
use crate::models::*;
use crate::provider_trait::ComputeService;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZoneInfo {
    zone_name: String,
    zone_state: ZoneState,
}

#[derive(Deserialize)]
struct ZoneState {
    available: bool,
}

#[derive(Deserialize)]
struct CreatedServer {
    id: String,
}

fn server_body(request: &CreateInstanceRequest) -> Result<serde_json::Value, CloudError> {
    let mut body = serde_json::to_value(request)?;
    if let Some(object) = body.as_object_mut() {
        let networks: Vec<serde_json::Value> = request
            .port_ids
            .iter()
            .map(|id| serde_json::json!({ "port": id }))
            .collect();
        object.insert("networks".to_string(), serde_json::Value::Array(networks));
        if let Some(user_data) = &request.user_data {
            object.insert(
                "user_data".to_string(),
                serde_json::Value::String(STANDARD.encode(user_data)),
            );
        }
    }
    Ok(body)
}

#[async_trait::async_trait]
impl ComputeService for CloudClient {
    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, CloudError> {
        self.compute
            .get_optional(&format!("/servers/{id}"), "server")
            .await
    }

    async fn list_instances(&self, filters: &[(&str, &str)]) -> Result<Vec<Instance>, CloudError> {
        // The compute API matches `name` as a regex; anchor it for exact lookups.
        let anchored: Vec<(String, String)> = filters
            .iter()
            .map(|(k, v)| {
                if *k == "name" {
                    ((*k).to_string(), format!("^{v}$"))
                } else {
                    ((*k).to_string(), (*v).to_string())
                }
            })
            .collect();
        let pairs: Vec<(&str, &str)> = anchored
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let instances: Vec<Instance> = self
            .compute
            .get(&HttpClient::with_query("/servers/detail", &pairs), "servers")
            .await?;
        Ok(instances
            .into_iter()
            .filter(|i| i.status != "DELETED" && i.status != "SOFT_DELETED")
            .collect())
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<Instance, CloudError> {
        let body = server_body(&request)?;
        let created: CreatedServer = self.compute.post("/servers", "server", &body).await?;
        debug!("Created instance {} ({})", request.name, created.id);

        // The create response carries only the ID; fetch the full record.
        match self.get_instance(&created.id).await? {
            Some(instance) => Ok(instance),
            None => Ok(Instance {
                id: created.id,
                name: request.name,
                status: "BUILD".to_string(),
                ..Default::default()
            }),
        }
    }

    async fn delete_instance(&self, id: &str) -> Result<(), CloudError> {
        self.compute.delete(&format!("/servers/{id}")).await
    }

    async fn list_availability_zones(&self) -> Result<Vec<AvailabilityZone>, CloudError> {
        let zones: Vec<ZoneInfo> = self
            .compute
            .get("/os-availability-zone", "availabilityZoneInfo")
            .await?;
        Ok(zones
            .into_iter()
            .map(|z| AvailabilityZone {
                name: z.zone_name,
                available: z.zone_state.available,
            })
            .collect())
    }

    async fn list_images(&self, filters: &[(&str, &str)]) -> Result<Vec<Image>, CloudError> {
        self.image
            .get(&HttpClient::with_query("/v2/images", filters), "images")
            .await
    }

    async fn get_image(&self, id: &str) -> Result<Option<Image>, CloudError> {
        let images = self.list_images(&[("id", id)]).await?;
        Ok(images.into_iter().find(|i| i.id == id))
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, CloudError> {
        self.compute.get("/flavors/detail", "flavors").await
    }

    async fn list_volumes(&self, filters: &[(&str, &str)]) -> Result<Vec<Volume>, CloudError> {
        self.volume
            .get(&HttpClient::with_query("/volumes/detail", filters), "volumes")
            .await
    }

    async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CloudError> {
        self.volume
            .post("/volumes", "volume", &serde_json::to_value(request)?)
            .await
    }

    async fn delete_volume(&self, id: &str) -> Result<(), CloudError> {
        self.volume.delete(&format!("/volumes/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_body_encodes_user_data_and_ports() {
        let request = CreateInstanceRequest {
            name: "node-0".to_string(),
            image_id: "img".to_string(),
            flavor_id: "flv".to_string(),
            port_ids: vec!["p1".to_string(), "p2".to_string()],
            user_data: Some("#cloud-config".to_string()),
            ..Default::default()
        };

        let body = server_body(&request).unwrap();
        assert_eq!(body["imageRef"], "img");
        assert_eq!(body["flavorRef"], "flv");
        assert_eq!(body["networks"][1]["port"], "p2");
        assert_eq!(body["user_data"], STANDARD.encode("#cloud-config"));
        assert!(body.get("port_ids").is_none());
    }
}
