use kube::CustomResourceExt;

use kube_postgres_bootstrap::crd::PostgresBootstrap;

/// Print the PostgresBootstrap CRD as YAML
fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&PostgresBootstrap::crd())?);
    Ok(())
}
