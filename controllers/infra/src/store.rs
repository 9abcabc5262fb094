//! Object store abstraction.
//!
//! Reconcilers read and write custom resources only through [`ObjectStore`], so they
//! can run against the Kubernetes API server ([`KubeStore`]) or an in-memory store in
//! unit tests. Writes carry the object's `resourceVersion`; a stale write fails with
//! [`ControllerError::Conflict`] and the pass is retried from a fresh read.

use crate::error::ControllerError;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// A namespaced resource the controller can persist.
pub trait StoredResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Declarative object store.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object, `None` if it does not exist
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError>;

    /// List objects in `namespace` carrying all of `labels`
    async fn list<K: StoredResource>(
        &self,
        namespace: &str,
        labels: &[(&str, &str)],
    ) -> Result<Vec<K>, ControllerError>;

    /// Create an object, `Conflict` if the name is taken
    async fn create<K: StoredResource>(&self, namespace: &str, obj: &K) -> Result<K, ControllerError>;

    /// Request deletion. Objects with finalizers only get a deletion timestamp.
    /// Deleting a missing object succeeds.
    async fn delete<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Replace metadata and spec
    async fn replace<K: StoredResource>(&self, obj: &K) -> Result<K, ControllerError>;

    /// Replace the status subresource
    async fn replace_status<K: StoredResource>(&self, obj: &K) -> Result<K, ControllerError>;
}

/// Name and namespace of a stored object
pub(crate) fn object_key<K: StoredResource>(obj: &K) -> Result<(String, String), ControllerError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("{} missing name", K::kind(&()))))?;
    let namespace = meta.namespace.clone().unwrap_or_else(|| "default".to_string());
    Ok((namespace, name))
}

fn map_write_error(kind: &str, name: &str, err: kube::Error) -> ControllerError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => {
            ControllerError::Conflict(format!("{kind} {name}: {}", ae.message))
        }
        kube::Error::Api(ae) if ae.code == 404 => ControllerError::NotFound(format!("{kind} {name}")),
        other => ControllerError::Kube(other),
    }
}

/// JSON merge patch that turns `old` into `new`.
///
/// Fields present in `old` but absent from `new` are set to `null` so that
/// cleared optional status fields are actually removed.
pub(crate) fn merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = serde_json::Map::new();
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value) => {
                        patch.insert(key.clone(), merge_patch(old_value, new_value));
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Store backed by the API server
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoredResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: StoredResource>(
        &self,
        namespace: &str,
        labels: &[(&str, &str)],
    ) -> Result<Vec<K>, ControllerError> {
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let lp = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector)
        };
        Ok(self.api::<K>(namespace).list(&lp).await?.items)
    }

    async fn create<K: StoredResource>(&self, namespace: &str, obj: &K) -> Result<K, ControllerError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        debug!("Creating {} {}/{}", K::kind(&()), namespace, name);
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_write_error(&K::kind(&()), &name, e))
    }

    async fn delete<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        debug!("Deleting {} {}/{}", K::kind(&()), namespace, name);
        match self.api::<K>(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(ControllerError::Kube(e)),
        }
    }

    async fn replace<K: StoredResource>(&self, obj: &K) -> Result<K, ControllerError> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_write_error(&K::kind(&()), &name, e))
    }

    async fn replace_status<K: StoredResource>(&self, obj: &K) -> Result<K, ControllerError> {
        let (namespace, name) = object_key(obj)?;
        let api = self.api::<K>(&namespace);

        let current = api
            .get_status(&name)
            .await
            .map_err(|e| map_write_error(&K::kind(&()), &name, e))?;
        let old_status = serde_json::to_value(&current)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let new_status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);

        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.meta().resource_version },
            "status": merge_patch(&old_status, &new_status),
        });

        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(&K::kind(&()), &name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch_nulls_removed_fields() {
        let old = json!({ "ready": true, "bastion": { "id": "b1", "floatingIp": "1.2.3.4" } });
        let new = json!({ "ready": true, "bastion": { "id": "b1" } });
        assert_eq!(
            merge_patch(&old, &new),
            json!({ "bastion": { "floatingIp": null } })
        );
    }

    #[test]
    fn test_merge_patch_replaces_arrays_wholesale() {
        let old = json!({ "claimedIps": ["1.1.1.1"] });
        let new = json!({ "claimedIps": ["1.1.1.1", "2.2.2.2"], "ready": false });
        assert_eq!(
            merge_patch(&old, &new),
            json!({ "claimedIps": ["1.1.1.1", "2.2.2.2"], "ready": false })
        );
    }

    #[test]
    fn test_merge_patch_from_null_status() {
        let new = json!({ "ready": false });
        assert_eq!(merge_patch(&Value::Null, &new), new);
    }
}
