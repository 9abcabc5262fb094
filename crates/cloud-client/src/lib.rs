//! Cloud provider client
//!
//! A Rust client for the provider services the Cloudforge controllers drive:
//! networking, compute (with images and block storage) and load balancing.
//!
//! # Example
//!
//! ```no_run
//! use cloud_client::{CloudClient, CloudEndpoints, NetworkingService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoints = CloudEndpoints {
//!     network: "http://cloud:9696".to_string(),
//!     compute: "http://cloud:8774/v2.1".to_string(),
//!     volume: "http://cloud:8776/v3/project".to_string(),
//!     image: "http://cloud:9292".to_string(),
//!     load_balancer: "http://cloud:9876".to_string(),
//! };
//! let client = CloudClient::new(&endpoints, "your-token".to_string())?;
//!
//! // Find external networks
//! let external = client.list_networks(&[("router:external", "true")]).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod provider_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{CloudClient, CloudEndpoints};
pub use common::HttpClient;
pub use error::CloudError;
pub use models::*;
pub use provider_trait::{CloudClientTrait, ComputeService, LoadBalancerService, NetworkingService};
#[cfg(feature = "test-util")]
pub use mock::MockCloudClient;
