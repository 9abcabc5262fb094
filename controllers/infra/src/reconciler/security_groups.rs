//! Managed security groups of a cluster.
//!
//! Groups are created first so rules can reference each other by ID, then every
//! group's observed rules are diffed against the desired set: missing rules are
//! created, rules nobody asked for are deleted.

use std::collections::{BTreeMap, HashSet};

use super::{Reconciler, ignore_not_found, naming};
use crate::error::{CloudResultExt, ControllerError};
use crate::store::ObjectStore;
use cloud_client::{CreateSecurityGroupRuleRequest, SecurityGroup, SecurityGroupRule, TaggedResource};
use crds::{CloudCluster, CloudClusterStatus, ManagedSecurityGroups, SecurityGroupRuleStatus, SecurityGroupStatus};
use tracing::info;

pub(crate) const CONTROL_PLANE: &str = "controlplane";
pub(crate) const WORKER: &str = "worker";
pub(crate) const BASTION: &str = "bastion";

const ROLES: [&str; 3] = [CONTROL_PLANE, WORKER, BASTION];

const NODE_PORT_MIN: u16 = 30000;
const NODE_PORT_MAX: u16 = 32767;

/// Rule without a group: the desired set is built per role and bound to a group ID later
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Rule {
    description: String,
    direction: String,
    ether_type: Option<String>,
    protocol: Option<String>,
    port_range_min: Option<u16>,
    port_range_max: Option<u16>,
    remote_group_id: Option<String>,
    remote_ip_prefix: Option<String>,
}

impl Rule {
    fn ingress(description: &str, protocol: &str, ports: (u16, u16)) -> Self {
        Self {
            description: description.to_string(),
            direction: "ingress".to_string(),
            ether_type: Some("IPv4".to_string()),
            protocol: Some(protocol.to_string()),
            port_range_min: Some(ports.0),
            port_range_max: Some(ports.1),
            remote_group_id: None,
            remote_ip_prefix: None,
        }
    }

    fn from_group(mut self, group_id: &str) -> Self {
        self.remote_group_id = Some(group_id.to_string());
        self
    }

    fn egress(ether_type: &str) -> Self {
        Self {
            description: String::new(),
            direction: "egress".to_string(),
            ether_type: Some(ether_type.to_string()),
            protocol: None,
            port_range_min: None,
            port_range_max: None,
            remote_group_id: None,
            remote_ip_prefix: None,
        }
    }

    fn in_cluster(group_id: &str) -> Self {
        Self {
            description: "In-cluster ingress".to_string(),
            direction: "ingress".to_string(),
            ether_type: Some("IPv4".to_string()),
            protocol: None,
            port_range_min: None,
            port_range_max: None,
            remote_group_id: Some(group_id.to_string()),
            remote_ip_prefix: None,
        }
    }

    fn request(&self, security_group_id: &str) -> CreateSecurityGroupRuleRequest {
        CreateSecurityGroupRuleRequest {
            security_group_id: security_group_id.to_string(),
            description: self.description.clone(),
            direction: self.direction.clone(),
            ether_type: self.ether_type.clone(),
            protocol: self.protocol.clone(),
            port_range_min: self.port_range_min,
            port_range_max: self.port_range_max,
            remote_group_id: self.remote_group_id.clone(),
            remote_ip_prefix: self.remote_ip_prefix.clone(),
        }
    }

    /// Description is not part of a rule's identity at the provider
    fn same_as(&self, observed: &SecurityGroupRule) -> bool {
        self.direction == observed.direction
            && self.ether_type == observed.ether_type
            && self.protocol == observed.protocol
            && self.port_range_min == observed.port_range_min
            && self.port_range_max == observed.port_range_max
            && self.remote_group_id == observed.remote_group_id
            && self.remote_ip_prefix == observed.remote_ip_prefix
    }
}

fn rule_status(rule: &SecurityGroupRule) -> SecurityGroupRuleStatus {
    SecurityGroupRuleStatus {
        id: rule.id.clone(),
        description: rule.description.clone(),
        direction: rule.direction.clone(),
        ether_type: rule.ether_type.clone(),
        protocol: rule.protocol.clone(),
        port_range_min: rule.port_range_min,
        port_range_max: rule.port_range_max,
        remote_group_id: rule.remote_group_id.clone(),
        remote_ip_prefix: rule.remote_ip_prefix.clone(),
    }
}

/// Desired rules per role, given the IDs of the groups that exist
fn desired_rules(
    managed: &ManagedSecurityGroups,
    api_server_port: u16,
    groups: &BTreeMap<&str, String>,
) -> Result<BTreeMap<&'static str, Vec<Rule>>, ControllerError> {
    let mut rules: BTreeMap<&'static str, Vec<Rule>> = BTreeMap::new();
    let control_plane = groups.get(CONTROL_PLANE).cloned().unwrap_or_default();
    let worker = groups.get(WORKER).cloned().unwrap_or_default();
    let bastion = groups.get(BASTION);

    let mut cp = vec![
        Rule::ingress("Kubernetes API", "tcp", (api_server_port, api_server_port)),
        Rule::ingress("Etcd", "tcp", (2379, 2380)).from_group(&control_plane),
        Rule::ingress("Kubelet API", "tcp", (10250, 10250)).from_group(&control_plane),
        Rule::ingress("Kubelet API", "tcp", (10250, 10250)).from_group(&worker),
    ];
    let mut wk = vec![
        Rule::ingress("Node Port Services", "tcp", (NODE_PORT_MIN, NODE_PORT_MAX)),
        Rule::ingress("Kubelet API", "tcp", (10250, 10250)).from_group(&control_plane),
    ];

    if let Some(bastion) = bastion {
        cp.push(Rule::ingress("SSH", "tcp", (22, 22)).from_group(bastion));
        wk.push(Rule::ingress("SSH", "tcp", (22, 22)).from_group(bastion));
        let mut bastion_rules = vec![Rule::ingress("SSH", "tcp", (22, 22))];
        bastion_rules.extend([Rule::egress("IPv4"), Rule::egress("IPv6")]);
        rules.insert(BASTION, bastion_rules);
    }

    if managed.allow_all_in_cluster_traffic {
        for group in [&control_plane, &worker] {
            cp.push(Rule::in_cluster(group));
            wk.push(Rule::in_cluster(group));
        }
    }

    for spec in &managed.all_nodes_security_group_rules {
        let base = Rule {
            description: spec.description.clone(),
            direction: spec.direction.clone(),
            ether_type: spec.ether_type.clone().or_else(|| Some("IPv4".to_string())),
            protocol: spec.protocol.clone(),
            port_range_min: spec.port_range_min,
            port_range_max: spec.port_range_max,
            remote_group_id: None,
            remote_ip_prefix: spec.remote_ip_prefix.clone(),
        };
        if !spec.remote_managed_groups.is_empty() && spec.remote_ip_prefix.is_some() {
            return Err(ControllerError::InvalidConfig(format!(
                "rule {:?} sets both remoteManagedGroups and remoteIpPrefix",
                spec.description
            )));
        }
        let expanded: Vec<Rule> = if spec.remote_managed_groups.is_empty() {
            vec![base]
        } else {
            let mut expanded = Vec::with_capacity(spec.remote_managed_groups.len());
            for role in &spec.remote_managed_groups {
                let Some(id) = groups.get(role.as_str()) else {
                    return Err(ControllerError::InvalidConfig(format!(
                        "rule {:?} references unknown managed group {role}",
                        spec.description
                    )));
                };
                expanded.push(base.clone().from_group(id));
            }
            expanded
        };
        cp.extend(expanded.iter().cloned());
        wk.extend(expanded);
    }

    for list in [&mut cp, &mut wk] {
        list.extend([Rule::egress("IPv4"), Rule::egress("IPv6")]);
    }
    rules.insert(CONTROL_PLANE, cp);
    rules.insert(WORKER, wk);

    for list in rules.values_mut() {
        let mut seen = HashSet::new();
        list.retain(|r| {
            let mut key = r.clone();
            key.description.clear();
            seen.insert(key)
        });
    }
    Ok(rules)
}

impl<S: ObjectStore> Reconciler<S> {
    async fn find_security_group(&self, name: &str) -> Result<Option<SecurityGroup>, ControllerError> {
        let found = self
            .cloud
            .list_security_groups(&[("name", name)])
            .await
            .with_op(|| format!("list security groups {name}"))?;
        Ok(found.into_iter().next())
    }

    /// Create the managed groups and converge their rules into status
    pub(crate) async fn reconcile_security_groups(
        &self,
        cluster: &CloudCluster,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        let Some(managed) = &cluster.spec.managed_security_groups else {
            return Ok(());
        };
        let mut roles = vec![CONTROL_PLANE, WORKER];
        if cluster.spec.bastion_enabled() {
            roles.push(BASTION);
        }

        let mut groups: BTreeMap<&str, SecurityGroup> = BTreeMap::new();
        for role in &roles {
            let group_name = naming::security_group_name(namespace, name, role);
            let group = match self.find_security_group(&group_name).await? {
                Some(group) => group,
                None => {
                    let group = self
                        .cloud
                        .create_security_group(&group_name, &format!("Cluster {namespace}/{name} {role} nodes"))
                        .await
                        .with_op(|| format!("create security group {group_name}"))?;
                    info!("Created security group {} ({})", group_name, group.id);
                    for tag in &cluster.spec.tags {
                        self.cloud
                            .add_tag(TaggedResource::SecurityGroup, &group.id, tag)
                            .await
                            .with_op(|| format!("tag security group {group_name}"))?;
                    }
                    group
                }
            };
            groups.insert(role, group);
        }

        let ids: BTreeMap<&str, String> = groups.iter().map(|(role, g)| (*role, g.id.clone())).collect();
        let desired = desired_rules(managed, cluster.spec.api_server_port(), &ids)?;

        for (role, group) in &groups {
            let wanted = desired.get(*role).cloned().unwrap_or_default();
            let mut kept = Vec::new();
            for observed in &group.rules {
                if wanted.iter().any(|r| r.same_as(observed)) {
                    kept.push(observed.clone());
                } else {
                    ignore_not_found(self.cloud.delete_security_group_rule(&observed.id).await)
                        .with_op(|| format!("delete rule {} of {}", observed.id, group.name))?;
                    info!("Deleted stale rule {} of security group {}", observed.id, group.name);
                }
            }
            for rule in &wanted {
                if kept.iter().any(|observed| rule.same_as(observed)) {
                    continue;
                }
                let created = self
                    .cloud
                    .create_security_group_rule(rule.request(&group.id))
                    .await
                    .with_op(|| format!("create rule {:?} in {}", rule.description, group.name))?;
                kept.push(created);
            }

            let group_status = SecurityGroupStatus {
                id: group.id.clone(),
                name: group.name.clone(),
                rules: kept.iter().map(rule_status).collect(),
            };
            match *role {
                CONTROL_PLANE => status.control_plane_security_group = Some(group_status),
                WORKER => status.worker_security_group = Some(group_status),
                _ => status.bastion_security_group = Some(group_status),
            }
        }

        if !cluster.spec.bastion_enabled() {
            status.bastion_security_group = None;
        }
        Ok(())
    }

    /// Delete every managed group of the cluster; a group still in use fails
    /// the pass and is retried
    pub(crate) async fn delete_security_groups(
        &self,
        namespace: &str,
        name: &str,
        status: &mut CloudClusterStatus,
    ) -> Result<(), ControllerError> {
        for role in ROLES {
            let group_name = naming::security_group_name(namespace, name, role);
            if let Some(group) = self.find_security_group(&group_name).await? {
                ignore_not_found(self.cloud.delete_security_group(&group.id).await)
                    .with_op(|| format!("delete security group {group_name}"))?;
                info!("Deleted security group {} ({})", group_name, group.id);
            }
        }
        status.control_plane_security_group = None;
        status.worker_security_group = None;
        status.bastion_security_group = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::SecurityGroupRuleSpec;

    fn ids(with_bastion: bool) -> BTreeMap<&'static str, String> {
        let mut ids = BTreeMap::from([(CONTROL_PLANE, "sg-cp".to_string()), (WORKER, "sg-w".to_string())]);
        if with_bastion {
            ids.insert(BASTION, "sg-b".to_string());
        }
        ids
    }

    #[test]
    fn test_bastion_ssh_only_with_bastion() {
        let managed = ManagedSecurityGroups::default();
        let without = desired_rules(&managed, 6443, &ids(false)).unwrap();
        assert!(!without.contains_key(BASTION));
        assert!(!without[CONTROL_PLANE].iter().any(|r| r.description == "SSH"));

        let with = desired_rules(&managed, 6443, &ids(true)).unwrap();
        assert!(with[WORKER]
            .iter()
            .any(|r| r.description == "SSH" && r.remote_group_id.as_deref() == Some("sg-b")));
    }

    #[test]
    fn test_remote_managed_groups_expand_per_group() {
        let managed = ManagedSecurityGroups {
            allow_all_in_cluster_traffic: false,
            all_nodes_security_group_rules: vec![SecurityGroupRuleSpec {
                description: "BGP".to_string(),
                direction: "ingress".to_string(),
                protocol: Some("tcp".to_string()),
                port_range_min: Some(179),
                port_range_max: Some(179),
                remote_managed_groups: vec![CONTROL_PLANE.to_string(), WORKER.to_string()],
                ..Default::default()
            }],
        };
        let rules = desired_rules(&managed, 6443, &ids(false)).unwrap();
        let bgp: Vec<_> = rules[WORKER].iter().filter(|r| r.description == "BGP").collect();
        assert_eq!(bgp.len(), 2);
    }

    #[test]
    fn test_unknown_remote_group_is_config_error() {
        let managed = ManagedSecurityGroups {
            allow_all_in_cluster_traffic: false,
            all_nodes_security_group_rules: vec![SecurityGroupRuleSpec {
                remote_managed_groups: vec![BASTION.to_string()],
                ..Default::default()
            }],
        };
        assert!(matches!(
            desired_rules(&managed, 6443, &ids(false)),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
