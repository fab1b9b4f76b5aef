//! Prints the CRD manifests as a multi-document YAML stream.

use crds::{ClusterOperator, OpenShiftAPIServer};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [OpenShiftAPIServer::crd(), ClusterOperator::crd()];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
