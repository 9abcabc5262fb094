//! Deterministic provider resource names.
//!
//! Every provider resource the controller creates gets a name derived from the
//! owning object, so a pass interrupted after a create can find (adopt) the
//! resource instead of creating a duplicate.

/// Network, subnet and router of a managed cluster topology
pub fn cluster_resource_name(namespace: &str, cluster: &str) -> String {
    format!("k8s-clusterapi-cluster-{namespace}-{cluster}")
}

/// API-server load balancer
pub fn load_balancer_name(namespace: &str, cluster: &str) -> String {
    format!("{}-kubeapi", cluster_resource_name(namespace, cluster))
}

/// Listener and pool of the API-server load balancer for `port`
pub fn load_balancer_port_name(namespace: &str, cluster: &str, port: u16) -> String {
    format!("{}-{port}", load_balancer_name(namespace, cluster))
}

/// Managed security group for `role` (`controlplane`, `worker` or `bastion`)
pub fn security_group_name(namespace: &str, cluster: &str, role: &str) -> String {
    format!("k8s-cluster-{namespace}-{cluster}-secgroup-{role}")
}

/// Tag put on floating IPs the controller allocates for a cluster API endpoint
pub fn cluster_api_tag(namespace: &str, cluster: &str) -> String {
    format!("{}-api", cluster_resource_name(namespace, cluster))
}

/// Tag put on the floating IP the controller allocates for a bastion
pub fn bastion_floating_ip_tag(namespace: &str, cluster: &str) -> String {
    format!("{}-bastion", cluster_resource_name(namespace, cluster))
}

/// CloudServer of a cluster's bastion
pub fn bastion_name(cluster: &str) -> String {
    format!("{cluster}-bastion")
}

/// Port `index` of a server; `suffix` overrides the index
pub fn port_name(server: &str, index: usize, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) if !suffix.is_empty() => format!("{server}-{suffix}"),
        _ => format!("{server}-{index}"),
    }
}

/// Boot volume of a server
pub fn root_volume_name(server: &str) -> String {
    format!("{server}-root")
}

/// Additional block device of a server
pub fn block_device_volume_name(server: &str, device: &str) -> String {
    format!("{server}-{device}")
}

/// IPAddressClaim a server makes against its floating IP pool
pub fn floating_ip_claim_name(server: &str) -> String {
    format!("{server}-floating-ip")
}

/// Load-balancer member of a machine on `port`
pub fn load_balancer_member_name(machine: &str, port: u16) -> String {
    format!("{machine}-{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_names() {
        assert_eq!(
            cluster_resource_name("default", "prod"),
            "k8s-clusterapi-cluster-default-prod"
        );
        assert_eq!(
            load_balancer_name("default", "prod"),
            "k8s-clusterapi-cluster-default-prod-kubeapi"
        );
        assert_eq!(
            security_group_name("default", "prod", "worker"),
            "k8s-cluster-default-prod-secgroup-worker"
        );
    }

    #[test]
    fn test_port_name_prefers_suffix() {
        assert_eq!(port_name("node-a", 0, None), "node-a-0");
        assert_eq!(port_name("node-a", 1, Some("storage")), "node-a-storage");
        assert_eq!(port_name("node-a", 2, Some("")), "node-a-2");
    }
}
