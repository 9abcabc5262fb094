//! Controller configuration from environment variables.

use crate::error::ControllerError;
use cloud_client::CloudEndpoints;

const DEFAULT_NETWORK_URL: &str = "http://cloud-api.cloud:9696";
const DEFAULT_COMPUTE_URL: &str = "http://cloud-api.cloud:8774/v2.1";
const DEFAULT_VOLUME_URL: &str = "http://cloud-api.cloud:8776/v3";
const DEFAULT_IMAGE_URL: &str = "http://cloud-api.cloud:9292";
const DEFAULT_LOAD_BALANCER_URL: &str = "http://cloud-api.cloud:9876";
const DEFAULT_CONCURRENCY: u16 = 3;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: CloudEndpoints,
    pub token: String,
    /// `None` watches all namespaces
    pub namespace: Option<String>,
    /// Concurrent reconciliations per watched kind
    pub concurrency: u16,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let token = lookup("CLOUD_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig("CLOUD_TOKEN environment variable is required".to_string())
            })?;

        let concurrency = match lookup("CONTROLLER_CONCURRENCY") {
            Some(raw) => raw.parse::<u16>().ok().filter(|c| *c > 0).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "CONTROLLER_CONCURRENCY must be a positive integer, got '{raw}'"
                ))
            })?,
            None => DEFAULT_CONCURRENCY,
        };

        Ok(Self {
            endpoints: CloudEndpoints {
                network: var("CLOUD_NETWORK_URL", DEFAULT_NETWORK_URL),
                compute: var("CLOUD_COMPUTE_URL", DEFAULT_COMPUTE_URL),
                volume: var("CLOUD_VOLUME_URL", DEFAULT_VOLUME_URL),
                image: var("CLOUD_IMAGE_URL", DEFAULT_IMAGE_URL),
                load_balancer: var("CLOUD_LOAD_BALANCER_URL", DEFAULT_LOAD_BALANCER_URL),
            },
            token,
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_token_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("CLOUD_TOKEN", "secret")])).unwrap();
        assert_eq!(config.token, "secret");
        assert_eq!(config.endpoints.network, DEFAULT_NETWORK_URL);
        assert_eq!(config.namespace, None);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("CLOUD_TOKEN", "secret"),
            ("CLOUD_COMPUTE_URL", "https://compute.example:8774/v2.1"),
            ("WATCH_NAMESPACE", "clusters"),
            ("CONTROLLER_CONCURRENCY", "8"),
        ]))
        .unwrap();
        assert_eq!(config.endpoints.compute, "https://compute.example:8774/v2.1");
        assert_eq!(config.namespace.as_deref(), Some("clusters"));
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_invalid_concurrency() {
        let err = Config::from_lookup(lookup(&[
            ("CLOUD_TOKEN", "secret"),
            ("CONTROLLER_CONCURRENCY", "zero"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
