//! Behaviour of the in-memory mock the controllers are tested against

#![cfg(feature = "test-util")]

use cloud_client::*;

#[tokio::test]
async fn test_port_and_instance_addresses() {
    let cloud = MockCloudClient::with_defaults();
    let net = cloud
        .create_network(CreateNetworkRequest {
            name: "cluster".to_string(),
            admin_state_up: true,
            ..Default::default()
        })
        .await
        .unwrap();
    cloud
        .create_subnet(CreateSubnetRequest {
            name: "cluster".to_string(),
            network_id: net.id.clone(),
            cidr: "10.0.0.0/24".to_string(),
            ip_version: 4,
            ..Default::default()
        })
        .await
        .unwrap();
    let port = cloud
        .create_port(CreatePortRequest {
            name: "node-0-0".to_string(),
            network_id: net.id.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    let instance = cloud
        .create_instance(CreateInstanceRequest {
            name: "node-0".to_string(),
            image_id: "image-ubuntu".to_string(),
            flavor_id: "flavor-small".to_string(),
            port_ids: vec![port.id.clone()],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(instance.status, "ACTIVE");
    let addrs = &instance.addresses["cluster"];
    assert_eq!(addrs.len(), 1);
    assert_eq!(addrs[0].ip_type.as_deref(), Some("fixed"));

    let mgmt = cloud.get_management_port(&instance.id, &net.id).await.unwrap();
    assert_eq!(mgmt.map(|p| p.id), Some(port.id));
}

#[tokio::test]
async fn test_network_delete_conflicts_while_ports_exist() {
    let cloud = MockCloudClient::with_defaults();
    let net = cloud
        .create_network(CreateNetworkRequest {
            name: "n".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let port = cloud
        .create_port(CreatePortRequest {
            name: "p".to_string(),
            network_id: net.id.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = cloud.delete_network(&net.id).await.unwrap_err();
    assert!(err.is_conflict());

    cloud.delete_port(&port.id).await.unwrap();
    cloud.delete_network(&net.id).await.unwrap();
    assert!(cloud.get_network(&net.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fault_injection_and_call_log() {
    let cloud = MockCloudClient::with_defaults();
    cloud.fail_on("create_floating_ip", "quota exceeded");

    let err = cloud
        .create_floating_ip(CreateFloatingIpRequest {
            floating_network_id: "public-net".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Api(ref m) if m == "quota exceeded"));

    cloud.clear_failures();
    let fip = cloud
        .create_floating_ip(CreateFloatingIpRequest {
            floating_network_id: "public-net".to_string(),
            floating_ip_address: Some("1.1.1.1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(fip.floating_ip_address, "1.1.1.1");
    assert_eq!(cloud.calls_to("create_floating_ip").len(), 2);

    cloud.add_tag(TaggedResource::FloatingIp, &fip.id, "pool-a").await.unwrap();
    let tagged = cloud.list_floating_ips(&[("tags", "pool-a")]).await.unwrap();
    assert_eq!(tagged.len(), 1);
}
