//! Integration tests for the cloud client
//!
//! These tests require a reachable cloud.
//! Set CLOUD_NETWORK_URL, CLOUD_COMPUTE_URL and CLOUD_TOKEN to run.

use cloud_client::{CloudClient, CloudEndpoints, ComputeService, NetworkingService};

fn client_from_env() -> CloudClient {
    let var = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.to_string());
    let endpoints = CloudEndpoints {
        network: var("CLOUD_NETWORK_URL", "http://localhost:9696"),
        compute: var("CLOUD_COMPUTE_URL", "http://localhost:8774/v2.1"),
        volume: var("CLOUD_VOLUME_URL", "http://localhost:8776/v3"),
        image: var("CLOUD_IMAGE_URL", "http://localhost:9292"),
        load_balancer: var("CLOUD_LOAD_BALANCER_URL", "http://localhost:9876"),
    };
    let token = std::env::var("CLOUD_TOKEN").expect("CLOUD_TOKEN environment variable must be set");
    CloudClient::new(&endpoints, token).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires a running cloud
async fn test_list_external_networks() {
    let client = client_from_env();
    let networks = client
        .list_networks(&[("router:external", "true")])
        .await
        .expect("Failed to list networks");
    println!("Found {} external networks", networks.len());
}

#[tokio::test]
#[ignore]
async fn test_list_availability_zones() {
    let client = client_from_env();
    let zones = client
        .list_availability_zones()
        .await
        .expect("Failed to list availability zones");
    assert!(zones.iter().all(|z| !z.name.is_empty()));
}
