use anyhow::{Context, Result};
use kube::{Client, Config};
use tracing::info;

/// Creates a Kubernetes client from the in-cluster service account or the
/// local kubeconfig, whichever is available.
pub async fn build_kube_client() -> Result<Client> {
    let config = Config::infer()
        .await
        .context("failed to infer Kubernetes configuration")?;
    let cluster_url = config.cluster_url.clone();

    let client = Client::try_from(config).context("failed to build Kubernetes client")?;

    info!(cluster = %cluster_url, "Kubernetes client initialized");
    Ok(client)
}
