use kube::CustomResourceExt;
use postgres_extension_operator::crd::{Database, Extension, ProviderConfig};

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [Extension::crd(), Database::crd(), ProviderConfig::crd()];

    let mut docs = Vec::with_capacity(crds.len());
    for crd in &crds {
        docs.push(serde_yaml::to_string(crd)?);
    }
    print!("{}", docs.join("---\n"));
    Ok(())
}
