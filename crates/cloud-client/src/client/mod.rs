//! Cloud provider REST client
//!
//! One `HttpClient` per service endpoint. Paths follow the OpenStack-style APIs:
//! networking under `/v2.0`, compute under `/servers`, block storage under
//! `/volumes`, images under `/v2/images` and load balancing under `/v2/lbaas`.

mod compute;
mod loadbalancer;
mod networking;

use crate::common::HttpClient;
use crate::error::CloudError;
use reqwest::Client;
use std::time::Duration;

/// Service endpoints
#[derive(Debug, Clone, Default)]
pub struct CloudEndpoints {
    /// Networking API base URL
    pub network: String,
    /// Compute API base URL
    pub compute: String,
    /// Block storage API base URL
    pub volume: String,
    /// Image API base URL
    pub image: String,
    /// Load balancer API base URL
    pub load_balancer: String,
}

/// Cloud provider REST client
#[derive(Debug, Clone)]
pub struct CloudClient {
    pub(crate) network: HttpClient,
    pub(crate) compute: HttpClient,
    pub(crate) volume: HttpClient,
    pub(crate) image: HttpClient,
    pub(crate) load_balancer: HttpClient,
}

impl CloudClient {
    /// Create a new cloud client
    ///
    /// # Arguments
    /// * `endpoints` - Base URL of every service
    /// * `token` - Token sent in the `X-Auth-Token` header
    pub fn new(endpoints: &CloudEndpoints, token: String) -> Result<Self, CloudError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let http = |base: &str| HttpClient::new(client.clone(), base.to_string(), token.clone());
        Ok(Self {
            network: http(&endpoints.network),
            compute: http(&endpoints.compute),
            volume: http(&endpoints.volume),
            image: http(&endpoints.image),
            load_balancer: http(&endpoints.load_balancer),
        })
    }

    /// Networking base URL
    pub fn network_url(&self) -> &str {
        self.network.base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let endpoints = CloudEndpoints {
            network: "http://cloud:9696/".to_string(),
            compute: "http://cloud:8774/v2.1".to_string(),
            volume: "http://cloud:8776/v3/project".to_string(),
            image: "http://cloud:9292".to_string(),
            load_balancer: "http://cloud:9876".to_string(),
        };
        let client = CloudClient::new(&endpoints, "token".to_string()).unwrap();
        assert_eq!(client.network_url(), "http://cloud:9696");
    }
}
