use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "worker-rpc")]
#[command(version)]
#[command(about = "Supervise the download worker and talk to its control channel", long_about = None)]
pub(crate) struct Cli {
    /// Config file (default: ~/.config/worker-rpc/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Spawn the worker and keep it running until Ctrl-C
    Start {
        /// Initial download job as JSON
        #[arg(long)]
        download: Option<String>,

        /// Initial seeding jobs as a JSON array
        #[arg(long)]
        seeds: Option<String>,

        /// Seconds between liveness checks
        #[arg(long, default_value = "5")]
        check_interval: u64,
    },

    /// Print the shared secret, creating it if needed
    Secret,

    /// Allocate a free control port and print it
    Port,

    /// Show how the worker would be launched
    Locate,

    /// Probe a running worker's health endpoint once
    Health {
        /// Control port of the worker
        #[arg(short, long)]
        port: u16,

        /// Probe timeout in milliseconds
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,
    },

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
    },

    /// Download and install the worker binary from the release endpoint
    InstallWorker {
        /// Release endpoint returning { version, downloadUrl }
        #[arg(long)]
        url: Option<String>,

        /// Install directory (default: first binary folder under resources)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Reinstall even if the recorded version is current
        #[arg(long)]
        force: bool,
    },
}
