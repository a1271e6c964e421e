//! Prints the Policy CustomResourceDefinition as YAML.
//!
//! `cargo run -p crds --bin crdgen > policy-crd.yaml`

use crds::Policy;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Policy::crd())?);
    Ok(())
}
