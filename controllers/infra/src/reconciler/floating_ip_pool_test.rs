//! Unit tests for FloatingIPPool reconciliation

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::Reconciler;
    use crate::store::ObjectStore;
    use crate::test_utils::{MemoryStore, TEST_NAMESPACE, create_test_claim, create_test_pool, create_test_reconciler};
    use cloud_client::{FloatingIp, MockCloudClient};
    use crds::conditions::{get_condition, is_true, reasons, types};
    use crds::{
        FloatingIPPool, FloatingIPPoolStatus, IP_CLAIM_FINALIZER, IPAddress, IPAddressClaim, NetworkParam,
        ReclaimPolicy, pool_tag,
    };
    use kube_runtime::controller::Action;
    use std::time::Duration;

    async fn setup(pool: FloatingIPPool) -> (MockCloudClient, MemoryStore, Reconciler<MemoryStore>) {
        let cloud = MockCloudClient::with_defaults();
        let store = MemoryStore::new();
        store.create(TEST_NAMESPACE, &pool).await.unwrap();
        let reconciler = create_test_reconciler(&cloud, &store);
        // first pass only adds the finalizer
        let created: FloatingIPPool = store.fetch("pool").unwrap();
        reconciler.reconcile_floating_ip_pool(&created).await.unwrap();
        (cloud, store, reconciler)
    }

    async fn pass(reconciler: &Reconciler<MemoryStore>, store: &MemoryStore) -> Result<Action, ControllerError> {
        let pool: FloatingIPPool = store.fetch("pool").expect("pool exists");
        reconciler.reconcile_floating_ip_pool(&pool).await
    }

    async fn claim(store: &MemoryStore, name: &str) {
        store
            .create(TEST_NAMESPACE, &create_test_claim(name, "pool"))
            .await
            .unwrap();
    }

    fn pool_status(store: &MemoryStore) -> FloatingIPPoolStatus {
        store
            .fetch::<FloatingIPPool>("pool")
            .and_then(|p| p.status)
            .unwrap_or_default()
    }

    fn claimed_address(store: &MemoryStore, claim: &str) -> Option<String> {
        let claim: IPAddressClaim = store.fetch(claim)?;
        let record = claim.status?.address_ref?;
        store.fetch::<IPAddress>(&record.name).map(|a| a.spec.address)
    }

    fn add_public_fip(cloud: &MockCloudClient, address: &str) {
        cloud.add_floating_ip(FloatingIp {
            id: format!("fip-{address}"),
            floating_ip_address: address.to_string(),
            floating_network_id: "public-net".to_string(),
            ..Default::default()
        });
    }

    fn assert_sets_disjoint(status: &FloatingIPPoolStatus) {
        for address in &status.available_ips {
            assert!(!status.claimed_ips.contains(address), "{address} available and claimed");
            assert!(!status.failed_ips.contains(address), "{address} available and failed");
        }
    }

    #[tokio::test]
    async fn test_claims_get_new_tagged_addresses() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", None, &[])).await;
        claim(&store, "claim-a").await;
        claim(&store, "claim-b").await;

        assert_eq!(pass(&reconciler, &store).await.unwrap(), Action::await_change());

        let a = claimed_address(&store, "claim-a").unwrap();
        let b = claimed_address(&store, "claim-b").unwrap();
        assert_ne!(a, b);

        let status = pool_status(&store);
        assert_eq!(status.claimed_ips, vec![a.clone(), b.clone()]);
        assert!(status.available_ips.is_empty());
        assert_eq!(status.floating_ip_network.unwrap().id, "public-net");
        assert!(is_true(&status.conditions, types::READY));

        let tag = pool_tag("pool");
        assert!(cloud.floating_ips().iter().all(|f| f.tags.contains(&tag)));

        let record: IPAddress = store.fetch("claim-a").unwrap();
        assert_eq!(record.spec.prefix, 32);
        assert_eq!(record.spec.claim_ref.name, "claim-a");
        assert!(record.metadata.finalizers.unwrap().contains(&IP_CLAIM_FINALIZER.to_string()));
        let claim: IPAddressClaim = store.fetch("claim-a").unwrap();
        assert!(is_true(&claim.status.unwrap().conditions, types::READY));
    }

    #[tokio::test]
    async fn test_served_claims_are_not_reallocated() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", None, &[])).await;
        claim(&store, "claim-a").await;
        pass(&reconciler, &store).await.unwrap();
        let first = claimed_address(&store, "claim-a");

        pass(&reconciler, &store).await.unwrap();

        assert_eq!(claimed_address(&store, "claim-a"), first);
        assert_eq!(cloud.calls_to("create_floating_ip").len(), 1);
        assert_eq!(store.count::<IPAddress>(), 1);
    }

    #[tokio::test]
    async fn test_preallocated_addresses_are_used_first() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", None, &["172.24.4.50"])).await;
        add_public_fip(&cloud, "172.24.4.50");
        claim(&store, "claim-a").await;

        pass(&reconciler, &store).await.unwrap();

        assert_eq!(claimed_address(&store, "claim-a").as_deref(), Some("172.24.4.50"));
        assert!(cloud.calls_to("create_floating_ip").is_empty());
    }

    #[tokio::test]
    async fn test_missing_preallocated_address_is_marked_failed() {
        let (_cloud, store, reconciler) = setup(create_test_pool("pool", None, &["172.24.4.50"])).await;
        claim(&store, "claim-a").await;

        pass(&reconciler, &store).await.unwrap();

        let address = claimed_address(&store, "claim-a").unwrap();
        assert_ne!(address, "172.24.4.50");
        let status = pool_status(&store);
        assert_eq!(status.failed_ips, vec!["172.24.4.50".to_string()]);
        assert_eq!(status.claimed_ips, vec![address]);
        assert_sets_disjoint(&status);
    }

    #[tokio::test]
    async fn test_max_ips_leaves_extra_claims_pending() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", Some(1), &[])).await;
        claim(&store, "claim-a").await;
        claim(&store, "claim-b").await;

        pass(&reconciler, &store).await.unwrap();

        assert!(claimed_address(&store, "claim-a").is_some());
        assert!(claimed_address(&store, "claim-b").is_none());
        assert_eq!(cloud.floating_ips().len(), 1);

        let pending: IPAddressClaim = store.fetch("claim-b").unwrap();
        let ready = get_condition(&pending.status.unwrap().conditions, types::READY).cloned().unwrap();
        assert_eq!(ready.reason, reasons::MAX_IPS_REACHED);
        assert!(ready.message.starts_with("pool-exhausted"));

        let status = pool_status(&store);
        let ready = get_condition(&status.conditions, types::READY).unwrap();
        assert_eq!(ready.reason, reasons::MAX_IPS_REACHED);

        // releasing the first claim frees a slot for the second
        store.delete::<IPAddressClaim>(TEST_NAMESPACE, "claim-a").await.unwrap();
        pass(&reconciler, &store).await.unwrap();
        assert!(claimed_address(&store, "claim-b").is_some());
        assert_eq!(pool_status(&store).claimed_ips.len(), 1);
    }

    #[tokio::test]
    async fn test_two_slots_with_preallocated_address() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", Some(2), &["1.1.1.1"])).await;
        add_public_fip(&cloud, "1.1.1.1");
        claim(&store, "claim-a").await;
        claim(&store, "claim-b").await;
        claim(&store, "claim-c").await;

        pass(&reconciler, &store).await.unwrap();

        assert_eq!(claimed_address(&store, "claim-a").as_deref(), Some("1.1.1.1"));
        let b = claimed_address(&store, "claim-b").unwrap();
        assert_ne!(b, "1.1.1.1");
        assert!(claimed_address(&store, "claim-c").is_none());
        assert_eq!(cloud.calls_to("create_floating_ip").len(), 1);

        let status = pool_status(&store);
        assert_eq!(status.claimed_ips, vec!["1.1.1.1".to_string(), b]);
        assert!(status.available_ips.is_empty());
        let ready = get_condition(&status.conditions, types::READY).unwrap();
        assert_eq!(ready.reason, reasons::MAX_IPS_REACHED);
        assert!(!is_true(&status.conditions, types::READY));
    }

    #[tokio::test]
    async fn test_claim_is_served_again_after_its_record_is_removed() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", None, &[])).await;
        claim(&store, "claim-a").await;
        pass(&reconciler, &store).await.unwrap();
        let first = claimed_address(&store, "claim-a").unwrap();

        store.delete::<IPAddress>(TEST_NAMESPACE, "claim-a").await.unwrap();
        pass(&reconciler, &store).await.unwrap();

        let second = claimed_address(&store, "claim-a").unwrap();
        assert_ne!(second, first);
        assert_eq!(cloud.calls_to("create_floating_ip").len(), 2);
        let claim: IPAddressClaim = store.fetch("claim-a").unwrap();
        assert!(is_true(&claim.status.unwrap().conditions, types::READY));
        let status = pool_status(&store);
        assert_eq!(status.claimed_ips, vec![second]);
        assert_sets_disjoint(&status);
    }

    #[tokio::test]
    async fn test_released_address_is_deleted_by_default() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", None, &[])).await;
        claim(&store, "claim-a").await;
        pass(&reconciler, &store).await.unwrap();
        assert_eq!(cloud.floating_ips().len(), 1);

        store.delete::<IPAddressClaim>(TEST_NAMESPACE, "claim-a").await.unwrap();
        pass(&reconciler, &store).await.unwrap();

        assert!(cloud.floating_ips().is_empty());
        assert_eq!(store.count::<IPAddress>(), 0);
        let status = pool_status(&store);
        assert!(status.claimed_ips.is_empty());
        assert!(status.available_ips.is_empty());
    }

    #[tokio::test]
    async fn test_released_address_is_kept_when_retained() {
        let mut pool = create_test_pool("pool", None, &[]);
        pool.spec.reclaim_policy = ReclaimPolicy::Retain;
        let (cloud, store, reconciler) = setup(pool).await;
        claim(&store, "claim-a").await;
        pass(&reconciler, &store).await.unwrap();
        let address = claimed_address(&store, "claim-a").unwrap();

        store.delete::<IPAddressClaim>(TEST_NAMESPACE, "claim-a").await.unwrap();
        pass(&reconciler, &store).await.unwrap();

        assert_eq!(cloud.floating_ips().len(), 1);
        let status = pool_status(&store);
        assert_eq!(status.available_ips, vec![address.clone()]);
        assert!(status.claimed_ips.is_empty());

        // the retained address is reused by the next claim
        claim(&store, "claim-b").await;
        pass(&reconciler, &store).await.unwrap();
        assert_eq!(claimed_address(&store, "claim-b"), Some(address));
        assert_eq!(cloud.calls_to("create_floating_ip").len(), 1);
        assert_sets_disjoint(&pool_status(&store));
    }

    #[tokio::test]
    async fn test_tagged_addresses_are_rediscovered() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", None, &[])).await;
        cloud.add_floating_ip(FloatingIp {
            id: "fip-lost".to_string(),
            floating_ip_address: "172.24.4.77".to_string(),
            floating_network_id: "public-net".to_string(),
            tags: vec![pool_tag("pool")],
            ..Default::default()
        });
        claim(&store, "claim-a").await;

        pass(&reconciler, &store).await.unwrap();

        assert_eq!(claimed_address(&store, "claim-a").as_deref(), Some("172.24.4.77"));
        assert!(cloud.calls_to("create_floating_ip").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_network_is_reported() {
        let mut pool = create_test_pool("pool", None, &[]);
        pool.spec.floating_ip_network = NetworkParam {
            name: Some("nowhere".to_string()),
            ..Default::default()
        };
        let (_cloud, store, reconciler) = setup(pool).await;

        assert!(pass(&reconciler, &store).await.is_err());

        let status = pool_status(&store);
        let ready = get_condition(&status.conditions, types::READY).unwrap();
        assert_eq!(ready.reason, reasons::UNABLE_TO_FIND_NETWORK);
    }

    #[tokio::test]
    async fn test_deletion_waits_for_claims_then_cleans_up() {
        let (cloud, store, reconciler) = setup(create_test_pool("pool", None, &["172.24.4.50"])).await;
        add_public_fip(&cloud, "172.24.4.50");
        claim(&store, "claim-a").await;
        claim(&store, "claim-b").await;
        pass(&reconciler, &store).await.unwrap();
        assert_eq!(cloud.floating_ips().len(), 2);

        store.delete::<FloatingIPPool>(TEST_NAMESPACE, "pool").await.unwrap();
        assert_eq!(
            pass(&reconciler, &store).await.unwrap(),
            Action::requeue(Duration::from_secs(10))
        );

        store.delete::<IPAddressClaim>(TEST_NAMESPACE, "claim-a").await.unwrap();
        store.delete::<IPAddressClaim>(TEST_NAMESPACE, "claim-b").await.unwrap();
        assert_eq!(pass(&reconciler, &store).await.unwrap(), Action::await_change());

        assert!(store.fetch::<FloatingIPPool>("pool").is_none());
        assert_eq!(store.count::<IPAddress>(), 0);
        // only the preallocated address survives
        let fips = cloud.floating_ips();
        assert_eq!(fips.len(), 1);
        assert_eq!(fips[0].floating_ip_address, "172.24.4.50");
    }
}
