//! Unit tests for the cluster bastion

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::Reconciler;
    use crate::store::ObjectStore;
    use crate::test_utils::{
        MemoryStore, TEST_NAMESPACE, create_test_cluster, create_test_cluster_spec, create_test_reconciler,
        create_test_template,
    };
    use cloud_client::{FloatingIp, MockCloudClient};
    use crds::conditions::{get_condition, is_true, reasons, types};
    use crds::{Bastion, CLUSTER_NAME_LABEL, CloudCluster, CloudServer};
    use kube::ResourceExt;
    use kube_runtime::controller::Action;
    use std::time::Duration;

    const BASTION: &str = "c1-bastion";
    const BASTION_TAG: &str = "k8s-clusterapi-cluster-default-c1-bastion";

    async fn setup() -> (MockCloudClient, MemoryStore, Reconciler<MemoryStore>) {
        let mut spec = create_test_cluster_spec();
        spec.bastion = Some(Bastion {
            enabled: true,
            spec: create_test_template(),
            ..Default::default()
        });
        let cloud = MockCloudClient::with_defaults();
        let store = MemoryStore::new();
        store
            .create(TEST_NAMESPACE, &create_test_cluster("c1", spec))
            .await
            .unwrap();
        let reconciler = create_test_reconciler(&cloud, &store);
        pass(&reconciler, &store).await.unwrap();
        (cloud, store, reconciler)
    }

    async fn pass(reconciler: &Reconciler<MemoryStore>, store: &MemoryStore) -> Result<Action, ControllerError> {
        let cluster: CloudCluster = store.fetch("c1").expect("cluster exists");
        reconciler.reconcile_cluster(&cluster).await
    }

    /// One server pass, for the bastion's own finalizer or provisioning
    async fn server_pass(reconciler: &Reconciler<MemoryStore>, store: &MemoryStore) {
        let server: CloudServer = store.fetch(BASTION).expect("bastion server exists");
        reconciler.reconcile_server(&server).await.unwrap();
    }

    /// Drive cluster and bastion server until the bastion is ready
    async fn converge(reconciler: &Reconciler<MemoryStore>, store: &MemoryStore) {
        assert_eq!(
            pass(reconciler, store).await.unwrap(),
            Action::requeue(Duration::from_secs(15))
        );
        server_pass(reconciler, store).await;
        server_pass(reconciler, store).await;
        assert_eq!(pass(reconciler, store).await.unwrap(), Action::await_change());
    }

    fn latest(store: &MemoryStore) -> CloudCluster {
        store.fetch("c1").expect("cluster exists")
    }

    async fn update_bastion(store: &MemoryStore, change: impl FnOnce(&mut Bastion)) {
        let mut cluster = latest(store);
        if let Some(bastion) = cluster.spec.bastion.as_mut() {
            change(bastion);
        }
        store.replace(&cluster).await.unwrap();
    }

    #[tokio::test]
    async fn test_bastion_created_with_floating_ip() {
        let (cloud, store, reconciler) = setup().await;

        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
        let status = latest(&store).status.unwrap();
        assert!(!status.ready);
        let bastion_ready = get_condition(&status.conditions, types::BASTION_READY).unwrap();
        assert_eq!(bastion_ready.reason, reasons::BASTION_PROVISIONING);
        assert!(status.bastion.unwrap().spec_hash.is_some());

        let server: CloudServer = store.fetch(BASTION).unwrap();
        assert_eq!(server.owner_references()[0].kind, "CloudCluster");
        assert_eq!(server.labels().get(CLUSTER_NAME_LABEL).map(String::as_str), Some("c1"));
        assert_eq!(
            server.spec.cluster_network.unwrap().id,
            status.network.map(|n| n.id)
        );

        server_pass(&reconciler, &store).await;
        server_pass(&reconciler, &store).await;
        assert_eq!(pass(&reconciler, &store).await.unwrap(), Action::await_change());

        let status = latest(&store).status.unwrap();
        assert!(status.ready);
        assert!(is_true(&status.conditions, types::BASTION_READY));
        let bastion = status.bastion.unwrap();
        assert!(bastion.ip.is_some());
        assert_eq!(bastion.state.as_deref(), Some("ACTIVE"));

        let address = bastion.floating_ip.unwrap();
        let fip = cloud
            .floating_ips()
            .into_iter()
            .find(|f| f.floating_ip_address == address)
            .unwrap();
        assert!(fip.tags.contains(&BASTION_TAG.to_string()));
        let instance = cloud.instances().into_iter().find(|i| i.name == BASTION).unwrap();
        let port = cloud.ports().into_iter().find(|p| p.device_id == instance.id).unwrap();
        assert_eq!(fip.port_id, Some(port.id));
    }

    #[tokio::test]
    async fn test_address_already_on_bastion_port_is_recorded() {
        let (cloud, store, reconciler) = setup().await;
        assert_eq!(
            pass(&reconciler, &store).await.unwrap(),
            Action::requeue(Duration::from_secs(15))
        );
        server_pass(&reconciler, &store).await;
        server_pass(&reconciler, &store).await;

        let instance = cloud.instances().into_iter().find(|i| i.name == BASTION).unwrap();
        let port = cloud.ports().into_iter().find(|p| p.device_id == instance.id).unwrap();
        cloud.add_floating_ip(FloatingIp {
            id: "fip-user".to_string(),
            floating_ip_address: "203.0.113.9".to_string(),
            floating_network_id: "public-net".to_string(),
            port_id: Some(port.id.clone()),
            ..Default::default()
        });
        cloud.clear_calls();

        assert_eq!(pass(&reconciler, &store).await.unwrap(), Action::await_change());

        let bastion = latest(&store).status.unwrap().bastion.unwrap();
        assert_eq!(bastion.floating_ip.as_deref(), Some("203.0.113.9"));
        assert!(cloud.calls_to("create_floating_ip").is_empty());
        assert!(cloud.calls_to("associate_floating_ip").is_empty());
        let on_port: Vec<String> = cloud
            .floating_ips()
            .into_iter()
            .filter(|f| f.port_id.as_deref() == Some(port.id.as_str()))
            .map(|f| f.floating_ip_address)
            .collect();
        assert_eq!(on_port, vec!["203.0.113.9".to_string()]);
    }

    #[tokio::test]
    async fn test_converged_bastion_is_left_alone() {
        let (cloud, store, reconciler) = setup().await;
        converge(&reconciler, &store).await;
        let before = latest(&store).status.unwrap().bastion;

        cloud.clear_calls();
        assert_eq!(pass(&reconciler, &store).await.unwrap(), Action::await_change());

        assert_eq!(latest(&store).status.unwrap().bastion, before);
        assert!(cloud.calls_to("create_floating_ip").is_empty());
        assert!(cloud.calls_to("associate_floating_ip").is_empty());
    }

    #[tokio::test]
    async fn test_template_change_replaces_bastion() {
        let (cloud, store, reconciler) = setup().await;
        converge(&reconciler, &store).await;
        let old_hash = latest(&store).status.unwrap().bastion.unwrap().spec_hash;
        let old_instance = cloud.instances().remove(0).id;

        update_bastion(&store, |b| b.availability_zone = Some("nova".to_string())).await;
        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
        let status = latest(&store).status.unwrap();
        let bastion_ready = get_condition(&status.conditions, types::BASTION_READY).unwrap();
        assert_eq!(bastion_ready.reason, reasons::BASTION_PROVISIONING);
        assert!(cloud.floating_ips().iter().all(|f| !f.tags.contains(&BASTION_TAG.to_string())));

        // old server finishes deleting, the replacement is created
        server_pass(&reconciler, &store).await;
        assert!(store.fetch::<CloudServer>(BASTION).is_none());
        converge(&reconciler, &store).await;

        let bastion = latest(&store).status.unwrap().bastion.unwrap();
        assert_ne!(bastion.spec_hash, old_hash);
        assert!(bastion.floating_ip.is_some());
        let server: CloudServer = store.fetch(BASTION).unwrap();
        assert_eq!(server.spec.template.availability_zone.as_deref(), Some("nova"));
        let instances = cloud.instances();
        assert_eq!(instances.len(), 1);
        assert_ne!(instances[0].id, old_instance);
    }

    #[tokio::test]
    async fn test_disabling_removes_bastion() {
        let (cloud, store, reconciler) = setup().await;
        converge(&reconciler, &store).await;

        update_bastion(&store, |b| b.enabled = false).await;
        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));

        server_pass(&reconciler, &store).await;
        assert_eq!(pass(&reconciler, &store).await.unwrap(), Action::await_change());

        let status = latest(&store).status.unwrap();
        assert!(status.ready);
        assert!(status.bastion.is_none());
        assert!(store.fetch::<CloudServer>(BASTION).is_none());
        assert!(cloud.instances().is_empty());
        assert!(cloud.floating_ips().iter().all(|f| !f.tags.contains(&BASTION_TAG.to_string())));
    }

    #[tokio::test]
    async fn test_cluster_deletion_removes_bastion_first() {
        let (cloud, store, reconciler) = setup().await;
        converge(&reconciler, &store).await;

        store.delete::<CloudCluster>(TEST_NAMESPACE, "c1").await.unwrap();
        let action = pass(&reconciler, &store).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
        assert_eq!(cloud.routers().len(), 1);

        server_pass(&reconciler, &store).await;
        assert_eq!(pass(&reconciler, &store).await.unwrap(), Action::await_change());

        assert!(store.fetch::<CloudCluster>("c1").is_none());
        assert!(cloud.instances().is_empty());
        assert!(cloud.floating_ips().is_empty());
        assert!(cloud.routers().is_empty());
        assert!(cloud.ports().is_empty());
        assert_eq!(cloud.networks().len(), 1);
    }
}
