//! Networking API (`/v2.0`)

use super::CloudClient;
use crate::common::HttpClient;
use crate::error::CloudError;
use crate::models::*;
use crate::provider_trait::NetworkingService;
use serde_json::json;

#[async_trait::async_trait]
impl NetworkingService for CloudClient {
    async fn list_networks(&self, filters: &[(&str, &str)]) -> Result<Vec<Network>, CloudError> {
        self.network
            .get(&HttpClient::with_query("/v2.0/networks", filters), "networks")
            .await
    }

    async fn get_network(&self, id: &str) -> Result<Option<Network>, CloudError> {
        self.network
            .get_optional(&format!("/v2.0/networks/{id}"), "network")
            .await
    }

    async fn create_network(&self, request: CreateNetworkRequest) -> Result<Network, CloudError> {
        self.network
            .post("/v2.0/networks", "network", &serde_json::to_value(request)?)
            .await
    }

    async fn delete_network(&self, id: &str) -> Result<(), CloudError> {
        self.network.delete(&format!("/v2.0/networks/{id}")).await
    }

    async fn list_subnets(&self, filters: &[(&str, &str)]) -> Result<Vec<Subnet>, CloudError> {
        self.network
            .get(&HttpClient::with_query("/v2.0/subnets", filters), "subnets")
            .await
    }

    async fn create_subnet(&self, request: CreateSubnetRequest) -> Result<Subnet, CloudError> {
        self.network
            .post("/v2.0/subnets", "subnet", &serde_json::to_value(request)?)
            .await
    }

    async fn list_routers(&self, filters: &[(&str, &str)]) -> Result<Vec<Router>, CloudError> {
        self.network
            .get(&HttpClient::with_query("/v2.0/routers", filters), "routers")
            .await
    }

    async fn create_router(&self, request: CreateRouterRequest) -> Result<Router, CloudError> {
        self.network
            .post("/v2.0/routers", "router", &serde_json::to_value(request)?)
            .await
    }

    async fn delete_router(&self, id: &str) -> Result<(), CloudError> {
        self.network.delete(&format!("/v2.0/routers/{id}")).await
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<(), CloudError> {
        self.network
            .put_raw(
                &format!("/v2.0/routers/{router_id}/add_router_interface"),
                Some(&json!({ "subnet_id": subnet_id })),
            )
            .await
    }

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<(), CloudError> {
        let result = self
            .network
            .put_raw(
                &format!("/v2.0/routers/{router_id}/remove_router_interface"),
                Some(&json!({ "subnet_id": subnet_id })),
            )
            .await;
        match result {
            Err(CloudError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn list_ports(&self, filters: &[(&str, &str)]) -> Result<Vec<Port>, CloudError> {
        self.network
            .get(&HttpClient::with_query("/v2.0/ports", filters), "ports")
            .await
    }

    async fn get_port(&self, id: &str) -> Result<Option<Port>, CloudError> {
        self.network.get_optional(&format!("/v2.0/ports/{id}"), "port").await
    }

    async fn create_port(&self, request: CreatePortRequest) -> Result<Port, CloudError> {
        self.network
            .post("/v2.0/ports", "port", &serde_json::to_value(request)?)
            .await
    }

    async fn delete_port(&self, id: &str) -> Result<(), CloudError> {
        self.network.delete(&format!("/v2.0/ports/{id}")).await
    }

    async fn list_trunks(&self, filters: &[(&str, &str)]) -> Result<Vec<Trunk>, CloudError> {
        self.network
            .get(&HttpClient::with_query("/v2.0/trunks", filters), "trunks")
            .await
    }

    async fn create_trunk(&self, request: CreateTrunkRequest) -> Result<Trunk, CloudError> {
        self.network
            .post("/v2.0/trunks", "trunk", &serde_json::to_value(request)?)
            .await
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), CloudError> {
        self.network.delete(&format!("/v2.0/trunks/{id}")).await
    }

    async fn list_floating_ips(&self, filters: &[(&str, &str)]) -> Result<Vec<FloatingIp>, CloudError> {
        self.network
            .get(&HttpClient::with_query("/v2.0/floatingips", filters), "floatingips")
            .await
    }

    async fn get_floating_ip(&self, id: &str) -> Result<Option<FloatingIp>, CloudError> {
        self.network
            .get_optional(&format!("/v2.0/floatingips/{id}"), "floatingip")
            .await
    }

    async fn create_floating_ip(&self, request: CreateFloatingIpRequest) -> Result<FloatingIp, CloudError> {
        self.network
            .post("/v2.0/floatingips", "floatingip", &serde_json::to_value(request)?)
            .await
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<(), CloudError> {
        self.network.delete(&format!("/v2.0/floatingips/{id}")).await
    }

    async fn associate_floating_ip(&self, id: &str, port_id: &str) -> Result<FloatingIp, CloudError> {
        self.network
            .put(
                &format!("/v2.0/floatingips/{id}"),
                "floatingip",
                &json!({ "port_id": port_id }),
            )
            .await
    }

    async fn disassociate_floating_ip(&self, id: &str) -> Result<FloatingIp, CloudError> {
        self.network
            .put(
                &format!("/v2.0/floatingips/{id}"),
                "floatingip",
                &json!({ "port_id": null }),
            )
            .await
    }

    async fn add_tag(&self, resource: TaggedResource, id: &str, tag: &str) -> Result<(), CloudError> {
        self.network
            .put_raw(
                &format!(
                    "/v2.0/{}/{id}/tags/{}",
                    resource.collection(),
                    urlencoding::encode(tag)
                ),
                None,
            )
            .await
    }

    async fn list_security_groups(&self, filters: &[(&str, &str)]) -> Result<Vec<SecurityGroup>, CloudError> {
        self.network
            .get(
                &HttpClient::with_query("/v2.0/security-groups", filters),
                "security_groups",
            )
            .await
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup, CloudError> {
        self.network
            .post(
                "/v2.0/security-groups",
                "security_group",
                &json!({ "name": name, "description": description }),
            )
            .await
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), CloudError> {
        self.network
            .delete(&format!("/v2.0/security-groups/{id}"))
            .await
    }

    async fn create_security_group_rule(
        &self,
        request: CreateSecurityGroupRuleRequest,
    ) -> Result<SecurityGroupRule, CloudError> {
        self.network
            .post(
                "/v2.0/security-group-rules",
                "security_group_rule",
                &serde_json::to_value(request)?,
            )
            .await
    }

    async fn delete_security_group_rule(&self, id: &str) -> Result<(), CloudError> {
        self.network
            .delete(&format!("/v2.0/security-group-rules/{id}"))
            .await
    }
}
