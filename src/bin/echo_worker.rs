use tracing_subscriber::EnvFilter;
use worker_rpc::reference_worker::{EchoWorker, WorkerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = WorkerArgs::parse(&args)?;

    EchoWorker::from_env(args).run().await?;
    Ok(())
}
