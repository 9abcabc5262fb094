//! Prints the CRD manifests as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/crds.yaml`

use crds::{CloudCluster, CloudMachine, CloudServer, FloatingIPPool, IPAddress, IPAddressClaim};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        CloudCluster::crd(),
        CloudServer::crd(),
        CloudMachine::crd(),
        FloatingIPPool::crd(),
        IPAddressClaim::crd(),
        IPAddress::crd(),
    ];

    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
