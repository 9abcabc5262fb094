//! Common utilities for the cloud client
//!
//! Provides the authenticated HTTP wrapper shared by every service endpoint.

use crate::error::CloudError;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Authentication header carrying the bearer token
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// HTTP client wrapper bound to one service endpoint
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Build a path with a query string from filters
    pub fn with_query(path: &str, filters: &[(&str, &str)]) -> String {
        if filters.is_empty() {
            return path.to_string();
        }
        let query = filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{path}?{query}")
    }

    /// GET a JSON document and pull out `key`
    pub async fn get<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<T, CloudError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let body = Self::check("GET", path, response).await?;
        Self::extract(body, key)
    }

    /// GET a single resource, mapping 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
    ) -> Result<Option<T>, CloudError> {
        match self.get(path, key).await {
            Ok(value) => Ok(Some(value)),
            Err(CloudError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// POST `{key: body}` and pull `key` from the response
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(AUTH_HEADER, &self.token)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ key: body }))
            .send()
            .await?;

        let body = Self::check("POST", path, response).await?;
        Self::extract(body, key)
    }

    /// PUT `{key: body}` and pull `key` from the response
    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        let url = self.build_url(path);
        debug!("PUT {}", url);

        let response = self
            .client
            .put(&url)
            .header(AUTH_HEADER, &self.token)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ key: body }))
            .send()
            .await?;

        let body = Self::check("PUT", path, response).await?;
        Self::extract(body, key)
    }

    /// PUT a raw body, ignoring the response
    pub async fn put_raw(&self, path: &str, body: Option<&serde_json::Value>) -> Result<(), CloudError> {
        let url = self.build_url(path);
        debug!("PUT {}", url);

        let mut request = self.client.put(&url).header(AUTH_HEADER, &self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::check("PUT", path, response).await?;
        Ok(())
    }

    /// DELETE a resource. A 404 is treated as already deleted.
    pub async fn delete(&self, path: &str) -> Result<(), CloudError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;

        match Self::check("DELETE", path, response).await {
            Ok(_) | Err(CloudError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn check(method: &str, path: &str, response: Response) -> Result<String, CloudError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(body);
        }

        let message = format!("{method} {path} failed: {status} - {body}");
        Err(match status {
            StatusCode::NOT_FOUND => CloudError::NotFound(message),
            StatusCode::CONFLICT => CloudError::Conflict(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CloudError::Authentication(message),
            StatusCode::BAD_REQUEST => CloudError::InvalidRequest(message),
            _ => CloudError::Api(message),
        })
    }

    fn extract<T: DeserializeOwned>(body: String, key: &str) -> Result<T, CloudError> {
        let mut value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            CloudError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                body.chars().take(500).collect::<String>()
            ))
        })?;
        let inner = value
            .get_mut(key)
            .map(serde_json::Value::take)
            .ok_or_else(|| CloudError::Api(format!("response has no `{key}` field")))?;
        Ok(serde_json::from_value(inner)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_query_encodes_values() {
        assert_eq!(HttpClient::with_query("/v2.0/networks", &[]), "/v2.0/networks");
        assert_eq!(
            HttpClient::with_query("/v2.0/networks", &[("name", "a b"), ("tags", "x,y")]),
            "/v2.0/networks?name=a%20b&tags=x%2Cy"
        );
    }

    #[test]
    fn test_build_url_trims_trailing_slash() {
        let http = HttpClient::new(Client::new(), "http://cloud:9696/".to_string(), "t".to_string());
        assert_eq!(http.build_url("/v2.0/ports"), "http://cloud:9696/v2.0/ports");
        assert_eq!(http.build_url("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_extract_missing_key() {
        let err = HttpClient::extract::<Vec<String>>("{}".to_string(), "networks").unwrap_err();
        assert!(matches!(err, CloudError::Api(_)));
    }
}
