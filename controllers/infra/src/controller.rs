//! Main controller implementation.
//!
//! The `Controller` builds the clients, the shared reconciler and one watcher
//! task per kind:
//! - CloudCluster: network, security groups, endpoint, load balancer, bastion
//! - CloudMachine: owns one CloudServer per node
//! - CloudServer: provider instance and everything attached to it
//! - FloatingIPPool: answers IPAddressClaims with floating IPs

use crate::config::Config;
use crate::error::{CloudResultExt, ControllerError};
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::Watcher;
use cloud_client::CloudClient;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn watcher_exit(kind: &str, result: Result<Result<(), ControllerError>, tokio::task::JoinError>) -> ControllerError {
    match result {
        Err(e) => ControllerError::Watch(format!("{kind} watcher panicked: {e}")),
        Ok(Err(e)) => ControllerError::Watch(format!("{kind} watcher error: {e}")),
        Ok(Ok(())) => ControllerError::Watch(format!("{kind} watcher stopped")),
    }
}

/// Main controller for the infrastructure kinds.
#[derive(Debug)]
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    server_watcher: JoinHandle<Result<(), ControllerError>>,
    pool_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing infrastructure controller");

        let kube_client = Client::try_default().await?;
        let cloud = CloudClient::new(&config.endpoints, config.token.clone()).op("create cloud client")?;
        let reconciler = Arc::new(Reconciler::new(cloud, KubeStore::new(kube_client.clone())));

        let ns = config.namespace.as_deref();
        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            config.concurrency,
            api(&kube_client, ns),
            api(&kube_client, ns),
            api(&kube_client, ns),
            api(&kube_client, ns),
            api(&kube_client, ns),
        ));

        let cluster_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_clusters().await })
        };

        let machine_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_machines().await })
        };

        let server_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_servers().await })
        };

        let pool_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_floating_ip_pools().await })
        };

        Ok(Self {
            cluster_watcher,
            machine_watcher,
            server_watcher,
            pool_watcher,
        })
    }

    /// Runs the controller until a watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Infrastructure controller running");

        // watchers run forever; any exit is fatal
        let err = tokio::select! {
            result = &mut self.cluster_watcher => watcher_exit("CloudCluster", result),
            result = &mut self.machine_watcher => watcher_exit("CloudMachine", result),
            result = &mut self.server_watcher => watcher_exit("CloudServer", result),
            result = &mut self.pool_watcher => watcher_exit("FloatingIPPool", result),
        };
        Err(err)
    }
}
