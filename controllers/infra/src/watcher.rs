//! Kubernetes resource watchers.
//!
//! Each infrastructure kind runs its own `kube_runtime::Controller`. All of them
//! go through the generic [`watch_resource`] helper, which wires the reconcile
//! function, the per-resource error backoff and the controller configuration.

use crate::error::ControllerError;
use crate::reconciler::{Reconciler, resource_key};
use crate::store::{KubeStore, StoredResource};
use crds::{CloudCluster, CloudMachine, CloudServer, FloatingIPPool, IPAddressClaim};
use futures::StreamExt;
use kube::Api;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type Context = Arc<Reconciler<KubeStore>>;
type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Run `controller` until its stream ends.
///
/// Successful passes reset the resource's backoff; failed passes are requeued
/// through [`Reconciler::error_action`].
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Context,
    concurrency: u16,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: StoredResource,
    F: Fn(Context, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, ctx: Context| {
        ctx.error_action(&resource_key(obj.as_ref()), error)
    };

    let reconcile = move |obj: Arc<K>, ctx: Context| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(obj.as_ref());
            debug!("Reconciling {}", key);
            let action = reconcile_fn(ctx.clone(), obj).await?;
            ctx.reset_backoff(&key);
            Ok::<Action, ControllerError>(action)
        }
    };

    // debounce batches the status writes of one pass into a single trigger
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(concurrency);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj.name),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    Ok(())
}

/// Watches the infrastructure kinds.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Context,
    concurrency: u16,
    cluster_api: Api<CloudCluster>,
    machine_api: Api<CloudMachine>,
    server_api: Api<CloudServer>,
    pool_api: Api<FloatingIPPool>,
    claim_api: Api<IPAddressClaim>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Context,
        concurrency: u16,
        cluster_api: Api<CloudCluster>,
        machine_api: Api<CloudMachine>,
        server_api: Api<CloudServer>,
        pool_api: Api<FloatingIPPool>,
        claim_api: Api<IPAddressClaim>,
    ) -> Self {
        Self {
            reconciler,
            concurrency,
            cluster_api,
            machine_api,
            server_api,
            pool_api,
            claim_api,
        }
    }

    /// Watches CloudCluster resources and their bastion servers.
    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.cluster_api.clone(), watcher::Config::default())
            .owns(self.server_api.clone(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            self.concurrency,
            |ctx, cluster: Arc<CloudCluster>| Box::pin(async move { ctx.reconcile_cluster(&cluster).await }),
            "CloudCluster",
        )
        .await
    }

    /// Watches CloudMachine resources and the servers they own.
    pub async fn watch_machines(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.machine_api.clone(), watcher::Config::default())
            .owns(self.server_api.clone(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            self.concurrency,
            |ctx, machine: Arc<CloudMachine>| Box::pin(async move { ctx.reconcile_machine(&machine).await }),
            "CloudMachine",
        )
        .await
    }

    /// Watches CloudServer resources and their floating IP claims.
    pub async fn watch_servers(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.server_api.clone(), watcher::Config::default())
            .owns(self.claim_api.clone(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            self.concurrency,
            |ctx, server: Arc<CloudServer>| Box::pin(async move { ctx.reconcile_server(&server).await }),
            "CloudServer",
        )
        .await
    }

    /// Watches FloatingIPPool resources. Claim events trigger the pool they
    /// reference.
    pub async fn watch_floating_ip_pools(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.pool_api.clone(), watcher::Config::default()).watches(
            self.claim_api.clone(),
            watcher::Config::default(),
            |claim: IPAddressClaim| {
                if claim.spec.pool_ref.kind != "FloatingIPPool" {
                    return None;
                }
                let pool = ObjectRef::<FloatingIPPool>::new(&claim.spec.pool_ref.name);
                let pool = match claim.metadata.namespace.as_deref() {
                    Some(ns) => pool.within(ns),
                    None => pool,
                };
                Some(pool)
            },
        );
        watch_resource(
            controller,
            self.reconciler.clone(),
            self.concurrency,
            |ctx, pool: Arc<FloatingIPPool>| Box::pin(async move { ctx.reconcile_floating_ip_pool(&pool).await }),
            "FloatingIPPool",
        )
        .await
    }
}
