//! Unit tests for CloudCluster reconciliation

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::Reconciler;
    use crate::store::ObjectStore;
    use crate::test_utils::{
        MemoryStore, TEST_NAMESPACE, create_test_cluster, create_test_cluster_spec, create_test_machine,
        create_test_reconciler,
    };
    use cloud_client::{FloatingIp, MockCloudClient};
    use crds::conditions::{ConditionStatus, get_condition, is_false, is_true, reasons, types};
    use crds::{ApiEndpoint, ApiServerLoadBalancer, CloudCluster, CloudClusterSpec, ConditionSeverity, SubnetSpec};
    use kube_runtime::controller::Action;
    use std::time::Duration;

    async fn setup(spec: CloudClusterSpec) -> (MockCloudClient, MemoryStore, Reconciler<MemoryStore>) {
        let cloud = MockCloudClient::with_defaults();
        let store = MemoryStore::new();
        store
            .create(TEST_NAMESPACE, &create_test_cluster("c1", spec))
            .await
            .unwrap();
        let reconciler = create_test_reconciler(&cloud, &store);
        (cloud, store, reconciler)
    }

    async fn pass(reconciler: &Reconciler<MemoryStore>, store: &MemoryStore) -> Result<Action, ControllerError> {
        let cluster: CloudCluster = store.fetch("c1").expect("cluster exists");
        reconciler.reconcile_cluster(&cluster).await
    }

    fn latest(store: &MemoryStore) -> CloudCluster {
        store.fetch("c1").expect("cluster exists")
    }

    #[tokio::test]
    async fn test_first_pass_only_adds_finalizer() {
        let (cloud, store, reconciler) = setup(create_test_cluster_spec()).await;

        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        assert_eq!(latest(&store).metadata.finalizers.unwrap().len(), 1);
        assert!(cloud.calls_to("create_network").is_empty());
    }

    #[tokio::test]
    async fn test_managed_network_and_floating_ip_endpoint() {
        let (cloud, store, reconciler) = setup(create_test_cluster_spec()).await;
        pass(&reconciler, &store).await.unwrap();

        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::await_change());

        let status = latest(&store).status.unwrap();
        assert!(status.ready);
        assert!(is_true(&status.conditions, types::READY));
        assert!(is_true(&status.conditions, types::NETWORK_READY));

        let network = status.network.unwrap();
        assert_eq!(network.name, "k8s-clusterapi-cluster-default-c1");
        assert_eq!(network.subnets.len(), 1);
        assert_eq!(network.subnets[0].cidr, "10.6.0.0/24");
        assert_eq!(status.external_network.unwrap().id, "public-net");
        assert!(status.router.is_some());
        assert_eq!(cloud.routers().len(), 1);

        let fips = cloud.floating_ips();
        assert_eq!(fips.len(), 1);
        let endpoint = status.control_plane_endpoint.unwrap();
        assert_eq!(endpoint.host, fips[0].floating_ip_address);
        assert_eq!(endpoint.port, 6443);
        assert_eq!(status.api_server_floating_ip.as_deref(), Some(endpoint.host.as_str()));
        assert!(fips[0].tags.iter().any(|t| t.contains("c1")));

        assert!(status.failure_domains["nova"].control_plane);
    }

    #[tokio::test]
    async fn test_converged_cluster_makes_no_changes() {
        let (cloud, store, reconciler) = setup(create_test_cluster_spec()).await;
        pass(&reconciler, &store).await.unwrap();
        pass(&reconciler, &store).await.unwrap();
        let before = latest(&store);
        cloud.clear_calls();

        pass(&reconciler, &store).await.unwrap();

        let after = latest(&store);
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
        let writes: Vec<String> = cloud
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("create_") || c.starts_with("add_router_interface"))
            .collect();
        assert!(writes.is_empty(), "unexpected provider writes: {writes:?}");
    }

    #[tokio::test]
    async fn test_endpoint_from_spec_wins() {
        let mut spec = create_test_cluster_spec();
        spec.control_plane_endpoint = Some(ApiEndpoint {
            host: "api.example.com".to_string(),
            port: 443,
        });
        let (cloud, store, reconciler) = setup(spec).await;
        pass(&reconciler, &store).await.unwrap();
        pass(&reconciler, &store).await.unwrap();

        let status = latest(&store).status.unwrap();
        assert_eq!(status.control_plane_endpoint.unwrap().host, "api.example.com");
        assert!(status.api_server_floating_ip.is_none());
        assert!(cloud.floating_ips().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_ip_endpoint_without_external_network() {
        let mut spec = create_test_cluster_spec();
        spec.disable_external_network = true;
        spec.api_server_fixed_ip = Some("10.6.0.5".to_string());
        let (cloud, store, reconciler) = setup(spec).await;
        pass(&reconciler, &store).await.unwrap();
        pass(&reconciler, &store).await.unwrap();

        let status = latest(&store).status.unwrap();
        assert!(status.ready);
        assert!(status.external_network.is_none());
        assert!(status.router.is_none());
        assert!(cloud.routers().is_empty());
        assert_eq!(
            status.control_plane_endpoint,
            Some(ApiEndpoint {
                host: "10.6.0.5".to_string(),
                port: 6443
            })
        );
    }

    #[tokio::test]
    async fn test_no_endpoint_source_is_invalid_config() {
        let mut spec = create_test_cluster_spec();
        spec.disable_external_network = true;
        let (_cloud, store, reconciler) = setup(spec).await;
        pass(&reconciler, &store).await.unwrap();

        let err = pass(&reconciler, &store).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let status = latest(&store).status.unwrap();
        assert!(!status.ready);
        let ready = get_condition(&status.conditions, types::READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, reasons::ENDPOINT_ERROR);
        assert_eq!(ready.severity, ConditionSeverity::Error);
    }

    #[tokio::test]
    async fn test_invalid_network_spec_creates_nothing() {
        let mut spec = create_test_cluster_spec();
        spec.managed_subnets.push(SubnetSpec {
            cidr: "10.7.0.0/24".to_string(),
            ..Default::default()
        });
        let (cloud, store, reconciler) = setup(spec).await;
        pass(&reconciler, &store).await.unwrap();

        let err = pass(&reconciler, &store).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let status = latest(&store).status.unwrap();
        let network = get_condition(&status.conditions, types::NETWORK_READY).unwrap();
        assert_eq!(network.reason, reasons::INVALID_CONFIGURATION);
        assert_eq!(cloud.networks().len(), 1);
    }

    #[tokio::test]
    async fn test_ready_cluster_stays_ready_on_transient_failure() {
        let (cloud, store, reconciler) = setup(create_test_cluster_spec()).await;
        pass(&reconciler, &store).await.unwrap();
        pass(&reconciler, &store).await.unwrap();

        cloud.fail_on("list_networks", "service unavailable");
        assert!(pass(&reconciler, &store).await.is_err());

        let status = latest(&store).status.unwrap();
        assert!(status.ready);
        assert!(is_true(&status.conditions, types::READY));
        assert!(is_false(&status.conditions, types::NETWORK_READY));
    }

    #[tokio::test]
    async fn test_load_balancer_provisioning_then_endpoint() {
        let mut spec = create_test_cluster_spec();
        spec.api_server_load_balancer = Some(ApiServerLoadBalancer {
            enabled: true,
            additional_ports: vec![22623],
            ..Default::default()
        });
        let (cloud, store, reconciler) = setup(spec).await;
        cloud.set_new_load_balancer_status("PENDING_CREATE");
        pass(&reconciler, &store).await.unwrap();

        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
        let status = latest(&store).status.unwrap();
        assert!(!status.ready);
        assert!(status.control_plane_endpoint.is_none());
        let endpoint = get_condition(&status.conditions, types::API_ENDPOINT_READY).unwrap();
        assert_eq!(endpoint.reason, reasons::LOAD_BALANCER_PROVISIONING);

        let lb = cloud.load_balancers().remove(0);
        cloud.set_load_balancer_status(&lb.id, "ACTIVE");
        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::await_change());

        let status = latest(&store).status.unwrap();
        assert!(status.ready);
        let lb_status = status.api_server_load_balancer.unwrap();
        let public = lb_status.ip.clone().unwrap();
        assert_eq!(status.control_plane_endpoint.unwrap().host, public);
        assert_eq!(lb_status.internal_ip, lb.vip_address);

        let mut ports: Vec<u16> = cloud.listeners().iter().map(|l| l.protocol_port).collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![6443, 22623]);

        let vip_fip = cloud
            .floating_ips()
            .into_iter()
            .find(|f| f.floating_ip_address == public)
            .unwrap();
        assert_eq!(vip_fip.port_id.as_deref(), Some(lb.vip_port_id.as_str()));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_machines_then_tears_down() {
        let (cloud, store, reconciler) = setup(create_test_cluster_spec()).await;
        pass(&reconciler, &store).await.unwrap();
        pass(&reconciler, &store).await.unwrap();
        store
            .create(TEST_NAMESPACE, &create_test_machine("m1", "c1", true))
            .await
            .unwrap();

        store.delete::<CloudCluster>(TEST_NAMESPACE, "c1").await.unwrap();
        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert_eq!(cloud.routers().len(), 1);
        let ready = get_condition(&latest(&store).status.unwrap().conditions, types::READY).cloned().unwrap();
        assert_eq!(ready.reason, reasons::DELETING);

        store
            .delete::<crds::CloudMachine>(TEST_NAMESPACE, "m1")
            .await
            .unwrap();
        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::await_change());

        assert!(store.fetch::<CloudCluster>("c1").is_none());
        assert!(cloud.routers().is_empty());
        assert!(cloud.floating_ips().is_empty());
        assert!(cloud.ports().is_empty());
        let networks = cloud.networks();
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].id, "public-net");
    }

    #[tokio::test]
    async fn test_deletion_keeps_user_supplied_floating_ip() {
        let mut spec = create_test_cluster_spec();
        spec.api_server_floating_ip = Some("172.24.4.200".to_string());
        let cloud = MockCloudClient::with_defaults();
        cloud.add_floating_ip(FloatingIp {
            id: "fip-user".to_string(),
            floating_ip_address: "172.24.4.200".to_string(),
            floating_network_id: "public-net".to_string(),
            ..Default::default()
        });
        let store = MemoryStore::new();
        store
            .create(TEST_NAMESPACE, &create_test_cluster("c1", spec))
            .await
            .unwrap();
        let reconciler = create_test_reconciler(&cloud, &store);
        pass(&reconciler, &store).await.unwrap();
        pass(&reconciler, &store).await.unwrap();
        assert_eq!(latest(&store).status.unwrap().control_plane_endpoint.unwrap().host, "172.24.4.200");
        assert_eq!(cloud.floating_ips().len(), 1);

        store.delete::<CloudCluster>(TEST_NAMESPACE, "c1").await.unwrap();
        pass(&reconciler, &store).await.unwrap();

        assert!(store.fetch::<CloudCluster>("c1").is_none());
        let fips = cloud.floating_ips();
        assert_eq!(fips.len(), 1);
        assert_eq!(fips[0].id, "fip-user");
    }
}
