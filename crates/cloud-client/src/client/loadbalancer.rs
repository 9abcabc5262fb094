//! Load balancer API (`/v2/lbaas`)

use super::CloudClient;
use crate::common::HttpClient;
use crate::error::CloudError;
use crate::models::*;
use crate::provider_trait::LoadBalancerService;
use serde_json::json;

#[async_trait::async_trait]
impl LoadBalancerService for CloudClient {
    async fn list_load_balancers(&self, filters: &[(&str, &str)]) -> Result<Vec<LoadBalancer>, CloudError> {
        self.load_balancer
            .get(
                &HttpClient::with_query("/v2/lbaas/loadbalancers", filters),
                "loadbalancers",
            )
            .await
    }

    async fn get_load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, CloudError> {
        self.load_balancer
            .get_optional(&format!("/v2/lbaas/loadbalancers/{id}"), "loadbalancer")
            .await
    }

    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer, CloudError> {
        self.load_balancer
            .post(
                "/v2/lbaas/loadbalancers",
                "loadbalancer",
                &serde_json::to_value(request)?,
            )
            .await
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError> {
        self.load_balancer
            .delete(&format!("/v2/lbaas/loadbalancers/{id}?cascade=true"))
            .await
    }

    async fn list_listeners(&self, load_balancer_id: &str) -> Result<Vec<Listener>, CloudError> {
        let listeners: Vec<Listener> = self
            .load_balancer
            .get(
                &HttpClient::with_query("/v2/lbaas/listeners", &[("loadbalancer_id", load_balancer_id)]),
                "listeners",
            )
            .await?;
        Ok(listeners
            .into_iter()
            .map(|mut l| {
                if l.loadbalancer_id.is_empty() {
                    l.loadbalancer_id = load_balancer_id.to_string();
                }
                l
            })
            .collect())
    }

    async fn create_listener(&self, request: CreateListenerRequest) -> Result<Listener, CloudError> {
        self.load_balancer
            .post("/v2/lbaas/listeners", "listener", &serde_json::to_value(request)?)
            .await
    }

    async fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: &[String]) -> Result<Listener, CloudError> {
        self.load_balancer
            .put(
                &format!("/v2/lbaas/listeners/{id}"),
                "listener",
                &json!({ "allowed_cidrs": allowed_cidrs }),
            )
            .await
    }

    async fn list_pools(&self, load_balancer_id: &str) -> Result<Vec<LbPool>, CloudError> {
        self.load_balancer
            .get(
                &HttpClient::with_query("/v2/lbaas/pools", &[("loadbalancer_id", load_balancer_id)]),
                "pools",
            )
            .await
    }

    async fn create_pool(&self, request: CreateLbPoolRequest) -> Result<LbPool, CloudError> {
        self.load_balancer
            .post("/v2/lbaas/pools", "pool", &serde_json::to_value(request)?)
            .await
    }

    async fn list_monitors(&self, pool_id: &str) -> Result<Vec<Monitor>, CloudError> {
        self.load_balancer
            .get(
                &HttpClient::with_query("/v2/lbaas/healthmonitors", &[("pool_id", pool_id)]),
                "healthmonitors",
            )
            .await
    }

    async fn create_monitor(&self, request: CreateMonitorRequest) -> Result<Monitor, CloudError> {
        self.load_balancer
            .post(
                "/v2/lbaas/healthmonitors",
                "healthmonitor",
                &serde_json::to_value(request)?,
            )
            .await
    }

    async fn list_members(&self, pool_id: &str) -> Result<Vec<Member>, CloudError> {
        self.load_balancer
            .get(&format!("/v2/lbaas/pools/{pool_id}/members"), "members")
            .await
    }

    async fn create_member(&self, pool_id: &str, request: CreateMemberRequest) -> Result<Member, CloudError> {
        self.load_balancer
            .post(
                &format!("/v2/lbaas/pools/{pool_id}/members"),
                "member",
                &serde_json::to_value(request)?,
            )
            .await
    }

    async fn delete_member(&self, pool_id: &str, member_id: &str) -> Result<(), CloudError> {
        self.load_balancer
            .delete(&format!("/v2/lbaas/pools/{pool_id}/members/{member_id}"))
            .await
    }
}
