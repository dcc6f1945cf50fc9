use std::time::Duration;
use worker_rpc::worker::protocol::JobPayload;
use worker_rpc::{SpawnOutcome, SupervisorConfig, WorkerSupervisor};

pub(crate) async fn cmd_start(
    config: SupervisorConfig,
    download: Option<String>,
    seeds: Option<String>,
    check_interval: u64,
) -> anyhow::Result<()> {
    config.validate()?;

    let download: Option<JobPayload> = download.as_deref().map(serde_json::from_str).transpose()?;
    let seeds: Option<Vec<JobPayload>> = seeds.as_deref().map(serde_json::from_str).transpose()?;

    let mut supervisor = WorkerSupervisor::new(config);
    match supervisor.spawn(download.as_ref(), seeds.as_deref()).await? {
        SpawnOutcome::Running { port, pid, launch } => {
            println!("Worker running on port {} (pid {:?}, {})", port, pid, launch);
        }
        SpawnOutcome::DownloadsDisabled { reason } => {
            println!("Downloads disabled: {}", reason);
            return Ok(());
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(check_interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !supervisor.check_liveness() {
                    let recent = supervisor.logs().tail(20);
                    for line in &recent {
                        eprintln!("  {}", line);
                    }
                    anyhow::bail!("worker exited unexpectedly");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping worker");
                break;
            }
        }
    }

    supervisor.kill();
    println!("Worker stopped");
    Ok(())
}
