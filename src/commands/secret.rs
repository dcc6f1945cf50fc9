use worker_rpc::{SecretStore, SupervisorConfig};

pub(crate) fn cmd_secret(config: &SupervisorConfig) -> anyhow::Result<()> {
    let path = config.resolved_store_path();
    let store = SecretStore::file(&path);
    let secret = store.get_or_create()?;
    tracing::debug!(path = %path.display(), "Secret store");
    println!("{}", secret);
    Ok(())
}
