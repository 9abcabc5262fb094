//! Reconciliation logic for the infrastructure CRDs.
//!
//! Every reconcile pass reads the desired state from the object store, drives the
//! provider one step closer to it, persists what it learned into status and returns
//! an [`Action`]. Passes never block waiting on provider convergence; they requeue.
//!
//! - `cluster`: CloudCluster (network topology, security groups, load balancer,
//!   control-plane endpoint, bastion, failure domains)
//! - `server`: CloudServer (ports, trunks, volumes, instance, pool floating IP)
//! - `machine`: CloudMachine (owns one CloudServer, load-balancer membership)
//! - `floating_ip_pool`: FloatingIPPool (claims, addresses, provider floating IPs)

pub mod bastion;
pub mod cluster;
pub mod endpoint;
pub mod floating_ip_pool;
pub mod loadbalancer;
pub mod machine;
pub mod naming;
pub mod network;
pub mod pool_state;
pub mod resolve;
pub mod security_groups;
pub mod server;

#[cfg(test)]
mod bastion_test;
#[cfg(test)]
mod cluster_test;
#[cfg(test)]
mod floating_ip_pool_test;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::store::{ObjectStore, StoredResource};
use cloud_client::CloudClientTrait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Requeue after a finalizer was added so the next pass starts from the persisted object
pub(crate) const REQUEUE_AFTER_FINALIZER: Duration = Duration::from_secs(1);
/// Cluster deletion waiting for its machines to disappear
pub(crate) const REQUEUE_MACHINES_DELETING: Duration = Duration::from_secs(5);
/// Waiting on a dependent server, claim or address
pub(crate) const REQUEUE_DEPENDENCY: Duration = Duration::from_secs(10);
/// Bastion and load-balancer convergence
pub(crate) const REQUEUE_BASTION: Duration = Duration::from_secs(15);
pub(crate) const REQUEUE_LOAD_BALANCER: Duration = Duration::from_secs(15);
/// Instance still building
pub(crate) const REQUEUE_INSTANCE_BUILD: Duration = Duration::from_secs(60);
/// Instance in a state we do not act on (shutoff, migrating, ...)
pub(crate) const REQUEUE_INSTANCE_OTHER: Duration = Duration::from_secs(300);
/// Stale write, retried from a fresh read
const REQUEUE_CONFLICT: Duration = Duration::from_secs(1);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300),
            error_count: 0,
        }
    }
}

/// Reconciles infrastructure resources against the cloud provider.
pub struct Reconciler<S> {
    pub(crate) cloud: Box<dyn CloudClientTrait>,
    pub(crate) store: S,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl<S: ObjectStore> Reconciler<S> {
    /// Creates a new reconciler instance.
    pub fn new(cloud: impl CloudClientTrait + 'static, store: S) -> Self {
        Self {
            cloud: Box::new(cloud),
            store,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Requeue decision for a failed pass.
    ///
    /// Conflicts retry almost immediately; everything else follows the per-resource
    /// Fibonacci backoff.
    pub fn error_action(&self, key: &str, error: &ControllerError) -> Action {
        if error.is_conflict() {
            debug!("Conflict on {}, retrying from a fresh read", key);
            return Action::requeue(REQUEUE_CONFLICT);
        }
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
        state.error_count += 1;
        let delay = state.backoff.next_backoff();
        warn!(
            resource = %key,
            error_count = state.error_count,
            delay_secs = delay.as_secs(),
            "Reconciliation failed: {}", error
        );
        Action::requeue(delay)
    }

    /// Forget the error history of a resource after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(key) {
            state.error_count = 0;
            state.backoff.reset();
        }
    }

    /// Value under key `value` of a Secret, `None` when the Secret does not exist
    pub(crate) async fn read_secret_value(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ControllerError> {
        let Some(secret) = self.store.get::<Secret>(namespace, name).await? else {
            return Ok(None);
        };
        let Some(value) = secret.data.as_ref().and_then(|data| data.get("value")) else {
            return Err(ControllerError::InvalidConfig(format!(
                "secret {namespace}/{name} has no key 'value'"
            )));
        };
        String::from_utf8(value.0.clone())
            .map(Some)
            .map_err(|e| ControllerError::InvalidConfig(format!("secret {namespace}/{name} is not UTF-8: {e}")))
    }

    /// Persist status only when it changed, returning the latest object
    pub(crate) async fn write_status<K: StoredResource>(
        &self,
        original: &K,
        updated: &K,
    ) -> Result<K, ControllerError> {
        let before = serde_json::to_value(original)?;
        let after = serde_json::to_value(updated)?;
        if before.get("status") == after.get("status") {
            return Ok(updated.clone());
        }
        self.store.replace_status(updated).await
    }
}

/// Backoff key for a resource
pub fn resource_key<K: StoredResource>(obj: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

pub(crate) fn is_deleting<K: StoredResource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub(crate) fn has_finalizer<K: StoredResource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add `finalizer`, returning whether the object changed
pub(crate) fn add_finalizer<K: StoredResource>(obj: &mut K, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.finalizers_mut().push(finalizer.to_string());
    true
}

/// Remove `finalizer`, returning whether the object changed
pub(crate) fn remove_finalizer<K: StoredResource>(obj: &mut K, finalizer: &str) -> bool {
    let before = obj.finalizers().len();
    obj.finalizers_mut().retain(|f| f != finalizer);
    before != obj.finalizers().len()
}

/// Controller owner reference pointing at `owner`
pub(crate) fn owner_reference<K: StoredResource>(owner: &K) -> Result<OwnerReference, ControllerError> {
    owner.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::Reconciliation(format!(
            "{} {} has no uid yet",
            K::kind(&()),
            owner.name_any()
        ))
    })
}

/// Namespace and name of a reconciled object
pub(crate) fn namespaced_name<K: StoredResource>(obj: &K) -> Result<(String, String), ControllerError> {
    crate::store::object_key(obj)
}

/// Treat a provider 404 as success (deleting something already gone)
pub(crate) fn ignore_not_found(result: Result<(), cloud_client::CloudError>) -> Result<(), cloud_client::CloudError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
