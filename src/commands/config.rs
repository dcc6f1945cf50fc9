use std::path::Path;
use worker_rpc::SupervisorConfig;

pub(crate) fn cmd_config(config: &SupervisorConfig, path: &Path, init: bool) -> anyhow::Result<()> {
    if init {
        if path.exists() {
            anyhow::bail!("config already exists at {}", path.display());
        }
        SupervisorConfig::default().save_to(path)?;
        println!("Wrote defaults to {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
