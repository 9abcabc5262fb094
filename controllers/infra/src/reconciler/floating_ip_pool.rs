//! FloatingIPPool reconciliation.
//!
//! The pool answers `IPAddressClaim`s that reference it with `IPAddress` records.
//! Address bookkeeping goes through [`PoolState`]; this module only observes the
//! provider and the store and persists the resulting state.

use super::pool_state::{Allocation, PoolEvent, PoolState};
use super::{
    REQUEUE_AFTER_FINALIZER, REQUEUE_DEPENDENCY, Reconciler, add_finalizer, has_finalizer, is_deleting,
    namespaced_name, remove_finalizer,
};
use crate::error::{CloudResultExt, ControllerError};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::ObjectStore;
use cloud_client::{CreateFloatingIpRequest, FloatingIp, TaggedResource};
use crds::conditions::{reasons, set_condition, types};
use crds::{
    Condition, ConditionSeverity, FloatingIPPool, IP_CLAIM_FINALIZER, IPAddress, IPAddressClaim, IPAddressSpec,
    LocalObjectReference, ObjectReference, POOL_FINALIZER, PoolNetworkStatus, ReclaimPolicy, pool_tag,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

const POOL_KIND: &str = "FloatingIPPool";

fn references_pool(pool_ref: &ObjectReference, pool: &str) -> bool {
    pool_ref.kind == POOL_KIND && pool_ref.name == pool
}

impl<S: ObjectStore> Reconciler<S> {
    /// Reconciles a FloatingIPPool resource.
    ///
    /// This method:
    /// 1. Resolves the floating network into status
    /// 2. Releases addresses whose claim is gone or being deleted
    /// 3. Allocates an address for every unfulfilled claim
    /// 4. Persists the pool sets
    pub async fn reconcile_floating_ip_pool(&self, pool: &FloatingIPPool) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(pool)?;
        info!("Reconciling FloatingIPPool {}/{}", namespace, name);

        if is_deleting(pool) {
            return self.delete_floating_ip_pool(pool).await;
        }

        if !has_finalizer(pool, POOL_FINALIZER) {
            let mut updated = pool.clone();
            add_finalizer(&mut updated, POOL_FINALIZER);
            self.store.replace(&updated).await?;
            return Ok(Action::requeue(REQUEUE_AFTER_FINALIZER));
        }

        let mut updated = pool.clone();
        let network = match self.resolve_network(&pool.spec.floating_ip_network).await {
            Ok(network) => network,
            Err(e) => {
                let status = updated.status.get_or_insert_with(Default::default);
                set_condition(
                    &mut status.conditions,
                    Condition::false_(
                        types::READY,
                        reasons::UNABLE_TO_FIND_NETWORK,
                        ConditionSeverity::Error,
                        e.to_string(),
                    ),
                );
                self.write_status(pool, &updated).await?;
                return Err(e);
            }
        };

        let addresses = self.pool_addresses(&namespace, &name).await?;
        let in_use: Vec<String> = addresses
            .iter()
            .filter(|a| !is_deleting(*a))
            .map(|a| a.spec.address.clone())
            .collect();
        let preallocated = &pool.spec.pre_allocated_floating_ips;
        let mut state = PoolState::from_status(pool.status.as_ref())
            .with_claimed(&in_use)
            .normalized(preallocated);

        let result = self.sync_pool_claims(pool, &network.id, &addresses, &mut state).await;
        let state = state.normalized(preallocated);

        let status = updated.status.get_or_insert_with(Default::default);
        state.write_to(status);
        status.floating_ip_network = Some(PoolNetworkStatus {
            id: network.id.clone(),
            name: network.name.clone(),
        });
        let ready = match &result {
            Ok(false) => Condition::true_(types::READY),
            Ok(true) => Condition::false_(
                types::READY,
                reasons::MAX_IPS_REACHED,
                ConditionSeverity::Error,
                format!(
                    "pool has reached its maximum of {} addresses",
                    pool.spec.max_ips.unwrap_or_default()
                ),
            ),
            Err(e) => Condition::false_(
                types::READY,
                reasons::FLOATING_IP_ERROR,
                ConditionSeverity::Warning,
                e.to_string(),
            ),
        };
        set_condition(&mut status.conditions, ready);
        self.write_status(pool, &updated).await?;

        result.map(|_| Action::await_change())
    }

    async fn delete_floating_ip_pool(&self, pool: &FloatingIPPool) -> Result<Action, ControllerError> {
        let (namespace, name) = namespaced_name(pool)?;
        if !has_finalizer(pool, POOL_FINALIZER) {
            return Ok(Action::await_change());
        }
        info!("Deleting FloatingIPPool {}/{}", namespace, name);

        let preallocated = &pool.spec.pre_allocated_floating_ips;
        let mut state = PoolState::from_status(pool.status.as_ref());
        for address in self.pool_addresses(&namespace, &name).await? {
            if self.claim_released(&namespace, &address).await? {
                self.release_address(pool, &address, &mut state).await?;
            }
        }

        let remaining = self.pool_addresses(&namespace, &name).await?;
        if !remaining.is_empty() {
            info!(
                "FloatingIPPool {}/{} still has {} addresses in use, waiting",
                namespace,
                name,
                remaining.len()
            );
            let mut updated = pool.clone();
            state.normalized(preallocated).write_to(updated.status.get_or_insert_with(Default::default));
            self.write_status(pool, &updated).await?;
            return Ok(Action::requeue(REQUEUE_DEPENDENCY));
        }

        if pool.spec.reclaim_policy == ReclaimPolicy::Delete {
            for address in state.available.iter().filter(|a| !preallocated.contains(*a)) {
                if let Some(fip) = self.find_floating_ip(address).await? {
                    info!("Deleting floating IP {} of pool {}/{}", address, namespace, name);
                    self.cloud
                        .delete_floating_ip(&fip.id)
                        .await
                        .with_op(|| format!("delete floating IP {address}"))?;
                }
            }
        }

        let mut updated = pool.clone();
        remove_finalizer(&mut updated, POOL_FINALIZER);
        self.store.replace(&updated).await?;
        Ok(Action::await_change())
    }

    /// Release and allocate. Returns whether a claim could not be served.
    async fn sync_pool_claims(
        &self,
        pool: &FloatingIPPool,
        network_id: &str,
        addresses: &[IPAddress],
        state: &mut PoolState,
    ) -> Result<bool, ControllerError> {
        let (namespace, name) = namespaced_name(pool)?;

        for address in addresses {
            if self.claim_released(&namespace, address).await? {
                self.release_address(pool, address, state).await?;
            }
        }

        let claims: Vec<IPAddressClaim> = self
            .store
            .list::<IPAddressClaim>(&namespace, &[])
            .await?
            .into_iter()
            .filter(|c| references_pool(&c.spec.pool_ref, &name))
            .collect();

        let mut exhausted = false;
        for mut claim in claims {
            if is_deleting(&claim) {
                continue;
            }
            let claim_name = claim.name_any();
            let record_name = claim
                .status
                .as_ref()
                .and_then(|s| s.address_ref.as_ref())
                .map(|r| r.name.clone());
            if let Some(record_name) = record_name {
                let live = addresses
                    .iter()
                    .any(|a| a.name_any() == record_name && !is_deleting(a));
                if live {
                    continue;
                }
                warn!(
                    "IPAddress {} of claim {} is gone, serving the claim again",
                    record_name, claim_name
                );
                claim = self.clear_claim_address(&claim).await?;
            }

            // record written by an earlier pass that died before updating the claim
            if let Some(existing) = addresses
                .iter()
                .find(|a| a.name_any() == claim_name && !is_deleting(*a))
            {
                self.fulfil_claim(&claim, &existing.name_any()).await?;
                continue;
            }

            match self.allocate_address(pool, network_id, state).await? {
                Some(address) => {
                    let record = self.create_ip_address(pool, &claim, &address).await?;
                    info!(
                        "Allocated {} from FloatingIPPool {}/{} to claim {}",
                        address, namespace, name, claim_name
                    );
                    self.fulfil_claim(&claim, &record.name_any()).await?;
                }
                None => {
                    warn!(
                        "FloatingIPPool {}/{} exhausted, claim {} not served",
                        namespace, name, claim_name
                    );
                    exhausted = true;
                    self.mark_claim_exhausted(&claim, &name).await?;
                }
            }
        }
        Ok(exhausted)
    }

    /// One address for one claim, `None` when the pool is exhausted
    async fn allocate_address(
        &self,
        pool: &FloatingIPPool,
        network_id: &str,
        state: &mut PoolState,
    ) -> Result<Option<String>, ControllerError> {
        let max_ips = pool.spec.max_ips;
        let pool_name = pool.name_any();
        let tag = pool_tag(&pool_name);

        if state.is_full(max_ips) {
            return Ok(None);
        }

        if state.available.is_empty() {
            let tagged = self
                .cloud
                .list_floating_ips(&[("floating_network_id", network_id), ("tags", tag.as_str())])
                .await
                .op("list pool floating IPs")?;
            *state = state.apply(&PoolEvent::Discovered(
                tagged.into_iter().map(|f| f.floating_ip_address).collect(),
            ));
        }

        if let Allocation::Reuse(address) = state.next_allocation(max_ips) {
            *state = state.apply(&PoolEvent::Claimed(address.clone()));
            if self.find_floating_ip(&address).await?.is_some() {
                return Ok(Some(address));
            }
            warn!("Floating IP {} of pool {} no longer exists, marking failed", address, pool_name);
            *state = state.apply(&PoolEvent::Failed(address));
        }

        if state.is_full(max_ips) {
            return Ok(None);
        }

        let fip = self
            .cloud
            .create_floating_ip(CreateFloatingIpRequest {
                floating_network_id: network_id.to_string(),
                description: format!("Floating IP pool {pool_name}"),
                ..Default::default()
            })
            .await
            .with_op(|| format!("create floating IP for pool {pool_name}"))?;

        let tagged = retry_with_backoff(&RetryConfig::provider_tagging(), "tag floating IP", || {
            self.cloud.add_tag(TaggedResource::FloatingIp, &fip.id, &tag)
        })
        .await;
        if let Err(e) = tagged {
            warn!(
                "Failed to tag floating IP {} for pool {}: {}",
                fip.floating_ip_address, pool_name, e
            );
        }

        *state = state.apply(&PoolEvent::Claimed(fip.floating_ip_address.clone()));
        Ok(Some(fip.floating_ip_address))
    }

    /// Give an address back: provider side first, then the record
    async fn release_address(
        &self,
        pool: &FloatingIPPool,
        record: &IPAddress,
        state: &mut PoolState,
    ) -> Result<(), ControllerError> {
        let address = &record.spec.address;
        let keep = pool.spec.reclaim_policy == ReclaimPolicy::Retain
            || pool.spec.pre_allocated_floating_ips.contains(address);

        if let Some(fip) = self.find_floating_ip(address).await? {
            if keep {
                if fip.port_id.is_some() {
                    self.cloud
                        .disassociate_floating_ip(&fip.id)
                        .await
                        .with_op(|| format!("disassociate floating IP {address}"))?;
                }
            } else {
                self.cloud
                    .delete_floating_ip(&fip.id)
                    .await
                    .with_op(|| format!("delete floating IP {address}"))?;
            }
        }
        info!("Released {} (kept in pool: {})", address, keep);

        *state = state.apply(&PoolEvent::Released {
            address: address.clone(),
            keep,
        });

        let (namespace, name) = namespaced_name(record)?;
        let mut updated = record.clone();
        if remove_finalizer(&mut updated, IP_CLAIM_FINALIZER) {
            self.store.replace(&updated).await?;
        }
        self.store.delete::<IPAddress>(&namespace, &name).await
    }

    /// The claim behind an address is gone or going
    async fn claim_released(&self, namespace: &str, record: &IPAddress) -> Result<bool, ControllerError> {
        if is_deleting(record) {
            return Ok(true);
        }
        let claim = self
            .store
            .get::<IPAddressClaim>(namespace, &record.spec.claim_ref.name)
            .await?;
        Ok(claim.as_ref().is_none_or(is_deleting))
    }

    async fn pool_addresses(&self, namespace: &str, pool: &str) -> Result<Vec<IPAddress>, ControllerError> {
        Ok(self
            .store
            .list::<IPAddress>(namespace, &[])
            .await?
            .into_iter()
            .filter(|a| references_pool(&a.spec.pool_ref, pool))
            .collect())
    }

    pub(crate) async fn find_floating_ip(&self, address: &str) -> Result<Option<FloatingIp>, ControllerError> {
        let found = self
            .cloud
            .list_floating_ips(&[("floating_ip_address", address)])
            .await
            .with_op(|| format!("find floating IP {address}"))?;
        Ok(found.into_iter().next())
    }

    async fn create_ip_address(
        &self,
        pool: &FloatingIPPool,
        claim: &IPAddressClaim,
        address: &str,
    ) -> Result<IPAddress, ControllerError> {
        let (namespace, claim_name) = namespaced_name(claim)?;
        let mut record = IPAddress::new(
            &claim_name,
            IPAddressSpec {
                claim_ref: LocalObjectReference {
                    name: claim_name.clone(),
                },
                pool_ref: ObjectReference::floating_ip_pool(pool.name_any()),
                address: address.to_string(),
                prefix: 32,
                gateway: None,
            },
        );
        record.metadata.namespace = Some(namespace.clone());
        record.metadata.finalizers = Some(vec![IP_CLAIM_FINALIZER.to_string()]);
        debug!("Creating IPAddress {}/{} for {}", namespace, claim_name, address);
        self.store.create(&namespace, &record).await
    }

    async fn fulfil_claim(&self, claim: &IPAddressClaim, address_name: &str) -> Result<(), ControllerError> {
        let mut updated = claim.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        status.address_ref = Some(LocalObjectReference {
            name: address_name.to_string(),
        });
        set_condition(&mut status.conditions, Condition::true_(types::READY));
        self.write_status(claim, &updated).await?;
        Ok(())
    }

    async fn clear_claim_address(&self, claim: &IPAddressClaim) -> Result<IPAddressClaim, ControllerError> {
        let mut updated = claim.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        status.address_ref = None;
        set_condition(
            &mut status.conditions,
            Condition::false_(
                types::READY,
                reasons::FLOATING_IP_ERROR,
                ConditionSeverity::Warning,
                "allocated address no longer exists",
            ),
        );
        self.write_status(claim, &updated).await
    }

    async fn mark_claim_exhausted(&self, claim: &IPAddressClaim, pool: &str) -> Result<(), ControllerError> {
        let mut updated = claim.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        set_condition(
            &mut status.conditions,
            Condition::false_(
                types::READY,
                reasons::MAX_IPS_REACHED,
                ConditionSeverity::Error,
                format!("pool-exhausted: FloatingIPPool {pool} has no address left"),
            ),
        );
        self.write_status(claim, &updated).await?;
        Ok(())
    }
}
