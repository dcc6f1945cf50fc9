use std::time::Duration;
use worker_rpc::{RpcClient, SecretStore, SupervisorConfig};

pub(crate) async fn cmd_health(
    port: u16,
    timeout_ms: u64,
    config: &SupervisorConfig,
) -> anyhow::Result<()> {
    let secret = SecretStore::file(config.resolved_store_path())
        .peek()?
        .unwrap_or_default();
    let client = RpcClient::new(port, &secret)?;

    match client.healthcheck(Duration::from_millis(timeout_ms)).await {
        Ok(true) => println!("healthy ({})", client.base_url()),
        Ok(false) => anyhow::bail!("worker on port {} answered unhealthy", port),
        Err(e) => anyhow::bail!("worker on port {} unreachable: {}", port, e),
    }
    Ok(())
}
