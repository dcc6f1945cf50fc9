mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use worker_rpc::SupervisorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(SupervisorConfig::config_path);
    let mut config = SupervisorConfig::load_from(&config_path)?;
    config.apply_env();

    match cli.command {
        Commands::Start {
            download,
            seeds,
            check_interval,
        } => commands::start::cmd_start(config, download, seeds, check_interval).await?,
        Commands::Secret => commands::secret::cmd_secret(&config)?,
        Commands::Port => commands::port::cmd_port(&config)?,
        Commands::Locate => commands::locate::cmd_locate(&config),
        Commands::Health { port, timeout_ms } => {
            commands::health::cmd_health(port, timeout_ms, &config).await?
        }
        Commands::Config { init } => commands::config::cmd_config(&config, &config_path, init)?,
        Commands::InstallWorker { url, dir, force } => {
            commands::install::cmd_install_worker(&config, url, dir, force).await?
        }
    }

    Ok(())
}
