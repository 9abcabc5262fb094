//! Test utilities for the reconcilers.
//!
//! [`MemoryStore`] is an [`ObjectStore`] that behaves like the API server as far as
//! the reconcilers can tell: resource versions, finalizer-gated deletion and a
//! status subresource that `replace` does not touch. The `create_test_*` builders
//! produce objects in the `default` namespace ready to be passed to `create`.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::{ObjectStore, StoredResource, object_key};
use cloud_client::MockCloudClient;
use crds::{
    CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, CloudCluster, CloudClusterSpec, CloudMachine, CloudMachineSpec,
    CloudServer, CloudServerSpec, FloatingIPPool, FloatingIPPoolSpec, IPAddressClaim, IPAddressClaimSpec, ImageParam,
    NetworkParam, ObjectReference, ServerTemplate, SubnetSpec,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const TEST_NAMESPACE: &str = "default";

const TIMESTAMP: &str = "2024-01-01T00:00:00Z";

type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Value>,
    next_uid: u64,
}

/// In-memory object store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

fn metadata_mut(value: &mut Value) -> &mut Map<String, Value> {
    value
        .as_object_mut()
        .expect("resources serialize to objects")
        .entry("metadata")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .expect("metadata is an object")
}

fn metadata_str(value: &Value, field: &str) -> Option<String> {
    value
        .pointer(&format!("/metadata/{field}"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn bump_version(value: &mut Value) {
    let next = metadata_str(value, "resourceVersion")
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    metadata_mut(value).insert("resourceVersion".to_string(), json!(next.to_string()));
}

fn check_version(kind: &str, name: &str, stored: &Value, incoming: &Value) -> Result<(), ControllerError> {
    match metadata_str(incoming, "resourceVersion") {
        Some(rv) if Some(&rv) != metadata_str(stored, "resourceVersion").as_ref() => Err(ControllerError::Conflict(
            format!("{kind} {name}: resourceVersion {rv} is stale"),
        )),
        _ => Ok(()),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key<K: StoredResource>(namespace: &str, name: &str) -> ObjectKey {
        (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
    }

    /// Number of stored objects of kind `K`
    pub fn count<K: StoredResource>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.lock().objects.keys().filter(|(k, _, _)| *k == kind).count()
    }

    /// Synchronous read for assertions
    pub fn fetch<K: StoredResource>(&self, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&Self::key::<K>(TEST_NAMESPACE, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError> {
        let value = self.lock().objects.get(&Self::key::<K>(namespace, name)).cloned();
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn list<K: StoredResource>(
        &self,
        namespace: &str,
        labels: &[(&str, &str)],
    ) -> Result<Vec<K>, ControllerError> {
        let kind = K::kind(&()).to_string();
        let values: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter(|(_, value)| {
                labels.iter().all(|(key, expected)| {
                    value
                        .pointer("/metadata/labels")
                        .and_then(|l| l.get(*key))
                        .and_then(Value::as_str)
                        == Some(*expected)
                })
            })
            .map(|(_, value)| value.clone())
            .collect();
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(ControllerError::from))
            .collect()
    }

    async fn create<K: StoredResource>(&self, namespace: &str, obj: &K) -> Result<K, ControllerError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = Self::key::<K>(namespace, &name);
        let mut value = serde_json::to_value(obj)?;

        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(ControllerError::Conflict(format!("{} {name} already exists", K::kind(&()))));
        }
        state.next_uid += 1;
        let uid = format!("uid-{}", state.next_uid);
        let meta = metadata_mut(&mut value);
        meta.insert("namespace".to_string(), json!(namespace));
        meta.insert("uid".to_string(), json!(uid));
        meta.insert("resourceVersion".to_string(), json!("1"));
        meta.insert("creationTimestamp".to_string(), json!(TIMESTAMP));
        meta.remove("deletionTimestamp");
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let key = Self::key::<K>(namespace, name);
        let mut state = self.lock();
        let Some(value) = state.objects.get_mut(&key) else {
            return Ok(());
        };
        if has_finalizers(value) {
            if metadata_str(value, "deletionTimestamp").is_none() {
                metadata_mut(value).insert("deletionTimestamp".to_string(), json!(TIMESTAMP));
                bump_version(value);
            }
        } else {
            state.objects.remove(&key);
        }
        Ok(())
    }

    async fn replace<K: StoredResource>(&self, obj: &K) -> Result<K, ControllerError> {
        let (namespace, name) = object_key(obj)?;
        let key = Self::key::<K>(&namespace, &name);
        let mut incoming = serde_json::to_value(obj)?;

        let mut state = self.lock();
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Err(ControllerError::NotFound(format!("{} {name}", K::kind(&()))));
        };
        check_version(&K::kind(&()), &name, &stored, &incoming)?;

        // status belongs to the subresource; server-owned metadata is kept
        if let Value::Object(map) = &mut incoming {
            match stored.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        let meta = metadata_mut(&mut incoming);
        for field in ["uid", "creationTimestamp", "deletionTimestamp", "resourceVersion", "namespace"] {
            match stored.pointer(&format!("/metadata/{field}")) {
                Some(v) => {
                    meta.insert(field.to_string(), v.clone());
                }
                None => {
                    meta.remove(field);
                }
            }
        }
        bump_version(&mut incoming);

        if metadata_str(&incoming, "deletionTimestamp").is_some() && !has_finalizers(&incoming) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, incoming.clone());
        }
        Ok(serde_json::from_value(incoming)?)
    }

    async fn replace_status<K: StoredResource>(&self, obj: &K) -> Result<K, ControllerError> {
        let (namespace, name) = object_key(obj)?;
        let key = Self::key::<K>(&namespace, &name);
        let incoming = serde_json::to_value(obj)?;

        let mut state = self.lock();
        let Some(stored) = state.objects.get_mut(&key) else {
            return Err(ControllerError::NotFound(format!("{} {name}", K::kind(&()))));
        };
        check_version(&K::kind(&()), &name, stored, &incoming)?;
        if let Value::Object(map) = &mut *stored {
            match incoming.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        bump_version(stored);
        Ok(serde_json::from_value(stored.clone())?)
    }
}

/// Reconciler over a shared mock cloud and store
pub fn create_test_reconciler(cloud: &MockCloudClient, store: &MemoryStore) -> Reconciler<MemoryStore> {
    Reconciler::new(cloud.clone(), store.clone())
}

fn test_meta(name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(TEST_NAMESPACE.to_string()),
        labels: if labels.is_empty() { None } else { Some(labels) },
        ..Default::default()
    }
}

/// Server template booting `ubuntu` on `m1.small`
pub fn create_test_template() -> ServerTemplate {
    ServerTemplate {
        image: ImageParam {
            name: Some("ubuntu".to_string()),
            ..Default::default()
        },
        flavor: "m1.small".to_string(),
        ..Default::default()
    }
}

/// Cluster spec with one managed subnet and no extras
pub fn create_test_cluster_spec() -> CloudClusterSpec {
    CloudClusterSpec {
        managed_subnets: vec![SubnetSpec {
            cidr: "10.6.0.0/24".to_string(),
            ..Default::default()
        }],
        managed_security_groups: None,
        api_server_load_balancer: None,
        network: None,
        subnets: Vec::new(),
        router: None,
        external_network: None,
        disable_external_network: false,
        network_mtu: None,
        disable_port_security: false,
        disable_api_server_floating_ip: false,
        api_server_floating_ip: None,
        api_server_fixed_ip: None,
        api_server_port: None,
        control_plane_endpoint: None,
        control_plane_availability_zones: Vec::new(),
        control_plane_omit_availability_zone: false,
        bastion: None,
        tags: Vec::new(),
    }
}

pub fn create_test_cluster(name: &str, spec: CloudClusterSpec) -> CloudCluster {
    CloudCluster {
        metadata: test_meta(name, BTreeMap::new()),
        spec,
        status: None,
    }
}

/// Machine of `cluster`, bootstrapped from secret `<name>-bootstrap`
pub fn create_test_machine(name: &str, cluster: &str, control_plane: bool) -> CloudMachine {
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())]);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    CloudMachine {
        metadata: test_meta(name, labels),
        spec: CloudMachineSpec {
            template: create_test_template(),
            bootstrap_data_secret: Some(format!("{name}-bootstrap")),
            failure_domain: None,
            provider_id: None,
        },
        status: None,
    }
}

/// Server on `network_id` built from the default template
pub fn create_test_server(name: &str, network_id: &str) -> CloudServer {
    CloudServer {
        metadata: test_meta(name, BTreeMap::new()),
        spec: CloudServerSpec {
            template: create_test_template(),
            user_data_ref: None,
            cluster_network: Some(NetworkParam::by_id(network_id)),
        },
        status: None,
    }
}

pub fn create_test_pool(name: &str, max_ips: Option<u32>, preallocated: &[&str]) -> FloatingIPPool {
    FloatingIPPool {
        metadata: test_meta(name, BTreeMap::new()),
        spec: FloatingIPPoolSpec {
            floating_ip_network: NetworkParam {
                name: Some("public".to_string()),
                ..Default::default()
            },
            pre_allocated_floating_ips: preallocated.iter().map(ToString::to_string).collect(),
            max_ips,
            reclaim_policy: Default::default(),
        },
        status: None,
    }
}

pub fn create_test_claim(name: &str, pool: &str) -> IPAddressClaim {
    IPAddressClaim {
        metadata: test_meta(name, BTreeMap::new()),
        spec: IPAddressClaimSpec {
            pool_ref: ObjectReference::floating_ip_pool(pool),
        },
        status: None,
    }
}

/// Secret with `value` under key `value`
pub fn create_test_secret(name: &str, value: &str) -> Secret {
    Secret {
        metadata: test_meta(name, BTreeMap::new()),
        data: Some(BTreeMap::from([(
            "value".to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Provider network with one subnet, for servers that use existing networking
pub fn add_test_network(cloud: &MockCloudClient, id: &str) {
    cloud.add_network(cloud_client::Network {
        id: id.to_string(),
        name: id.to_string(),
        ..Default::default()
    });
    cloud.add_subnet(cloud_client::Subnet {
        id: format!("{id}-subnet"),
        name: format!("{id}-subnet"),
        network_id: id.to_string(),
        cidr: "10.0.0.0/24".to_string(),
        ..Default::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[tokio::test]
    async fn test_memory_store_versions_and_conflicts() {
        let store = MemoryStore::new();
        let created = store
            .create(TEST_NAMESPACE, &create_test_claim("claim", "pool"))
            .await
            .unwrap();
        assert_eq!(created.resource_version().as_deref(), Some("1"));
        assert!(created.uid().is_some());

        let updated = store.replace(&created).await.unwrap();
        assert_eq!(updated.resource_version().as_deref(), Some("2"));

        // stale write
        let err = store.replace(&created).await.unwrap_err();
        assert!(err.is_conflict());

        let err = store
            .create(TEST_NAMESPACE, &create_test_claim("claim", "pool"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_memory_store_finalizers_gate_deletion() {
        let store = MemoryStore::new();
        let mut claim = create_test_claim("claim", "pool");
        claim.metadata.finalizers = Some(vec!["test".to_string()]);
        store.create(TEST_NAMESPACE, &claim).await.unwrap();

        store.delete::<IPAddressClaim>(TEST_NAMESPACE, "claim").await.unwrap();
        let deleting: IPAddressClaim = store.fetch("claim").unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());

        let mut released = deleting.clone();
        released.metadata.finalizers = None;
        store.replace(&released).await.unwrap();
        assert!(store.fetch::<IPAddressClaim>("claim").is_none());

        // deleting something already gone is fine
        store.delete::<IPAddressClaim>(TEST_NAMESPACE, "claim").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_replace_keeps_status() {
        let store = MemoryStore::new();
        let created = store
            .create(TEST_NAMESPACE, &create_test_claim("claim", "pool"))
            .await
            .unwrap();
        let mut with_status = created.clone();
        with_status.status = Some(Default::default());
        let written = store.replace_status(&with_status).await.unwrap();
        assert!(written.status.is_some());

        let mut spec_change = written.clone();
        spec_change.status = None;
        let replaced = store.replace(&spec_change).await.unwrap();
        assert!(replaced.status.is_some());
    }

    #[tokio::test]
    async fn test_memory_store_lists_by_label() {
        let store = MemoryStore::new();
        store
            .create(TEST_NAMESPACE, &create_test_machine("m1", "c1", true))
            .await
            .unwrap();
        store
            .create(TEST_NAMESPACE, &create_test_machine("m2", "c2", false))
            .await
            .unwrap();

        let machines: Vec<CloudMachine> = store
            .list(TEST_NAMESPACE, &[(CLUSTER_NAME_LABEL, "c1")])
            .await
            .unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].name_any(), "m1");
        assert_eq!(store.count::<CloudMachine>(), 2);
    }
}
