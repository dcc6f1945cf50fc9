use anyhow::Context;
use std::path::PathBuf;
use worker_rpc::release::{ReleaseChannel, WorkerInstaller};
use worker_rpc::SupervisorConfig;

pub(crate) async fn cmd_install_worker(
    config: &SupervisorConfig,
    url: Option<String>,
    dir: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let url = url
        .or_else(|| config.release_url.clone())
        .context("no release URL given and none configured")?;
    let install_dir = match dir {
        Some(dir) => dir,
        None => config
            .candidate_dirs()
            .into_iter()
            .next()
            .context("no install directory available")?,
    };

    let channel = ReleaseChannel::new(url)?;
    let release = channel.latest().await?;
    println!("Latest worker release: {}", release.version);

    let installer = WorkerInstaller::new(&config.binary_name)?;
    let installed = if force {
        Some(installer.install(&release, &install_dir).await?)
    } else {
        installer.install_if_newer(&release, &install_dir).await?
    };

    match installed {
        Some(path) => println!("Installed {} to {}", release.version, path.display()),
        None => println!("Already up to date"),
    }
    Ok(())
}
