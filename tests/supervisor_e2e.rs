//! End-to-end supervision of a real worker process.
//!
//! Every test launches the `worker-rpc-echo` binary through the supervisor
//! with its own store and port range, so tests can run in parallel without
//! racing for control ports.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use worker_rpc::worker::notice::{Availability, RecordingNotifier, UserNotice};
use worker_rpc::worker::protocol::JobPayload;
use worker_rpc::worker::supervisor::LaunchKind;
use worker_rpc::{
    BinaryLocator, JsonFileStore, KeyValueStore, Platform, RpcClient, RpcError, SpawnOutcome,
    SupervisorConfig, SupervisorState, WorkerSupervisor,
};

fn echo_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_worker-rpc-echo"))
}

fn config_for(dir: &Path, start: u16, end: u16) -> SupervisorConfig {
    SupervisorConfig {
        preferred_port: start,
        port_range_start: start,
        port_range_end: end,
        store_path: Some(dir.join("store.json")),
        resources_dir: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

fn native_locator(dir: &Path, binary: &Path) -> BinaryLocator {
    BinaryLocator::new(Platform::current(), "absent-worker", vec![dir.to_path_buf()])
        .with_override(binary)
}

fn supervisor(
    config: SupervisorConfig,
    locator: BinaryLocator,
    notifier: &Arc<RecordingNotifier>,
) -> WorkerSupervisor {
    WorkerSupervisor::new(config)
        .with_locator(locator)
        .with_notifier(Arc::clone(notifier))
}

#[cfg(unix)]
fn write_executable(path: &Path, content: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, content).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn spawn_with_occupied_port_and_slow_health() {
    let dir = tempfile::tempdir().unwrap();
    // May fail if something else already owns 8084; either way it is not free.
    let _held = TcpListener::bind(("127.0.0.1", 8084)).ok();

    let mut config = config_for(dir.path(), 8084, 8084);
    config.port_range_start = 8080;
    config.port_range_end = 9000;
    config
        .worker_env
        .insert("WORKER_RPC_ECHO_UNHEALTHY_PROBES".into(), "3".into());

    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(config, native_locator(dir.path(), &echo_bin()), &notifier);

    let started = Instant::now();
    let outcome = supervisor.spawn(None, None).await.unwrap();
    let elapsed = started.elapsed();

    let (port, launch) = match outcome {
        SpawnOutcome::Running { port, launch, .. } => (port, launch),
        other => panic!("worker did not start: {other:?}"),
    };
    assert_ne!(port, 8084);
    assert!((8080..=9000).contains(&port));
    assert_eq!(launch, LaunchKind::Native { path: echo_bin() });
    assert!(elapsed >= Duration::from_millis(300), "healthy too early: {elapsed:?}");
    // Three failed probes at the default cadence, nowhere near the 10 s deadline.
    assert!(elapsed < Duration::from_millis(1500), "spawn too slow: {elapsed:?}");

    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(supervisor.availability(), Availability::Ready);
    assert!(notifier.notices().is_empty());

    let store = JsonFileStore::new(dir.path().join("store.json"));
    let secret = store.get("rpcPassword").unwrap().unwrap();
    assert_eq!(secret.len(), 64);
    assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    let held = supervisor.secrets().peek().unwrap().unwrap();
    assert_eq!(held, secret);

    let client = supervisor.client().unwrap().clone();
    assert_eq!(client.port(), port);
    let job = JobPayload::download("42", "magnet:?xt=urn:btih:abc", "/games");
    client.start_download(&job).await.unwrap();
    assert_eq!(client.status().await.unwrap().unwrap().job_id, "42");

    // The worker accepts exactly the stored secret.
    let same_secret = RpcClient::new(port, &held).unwrap();
    assert_eq!(same_secret.status().await.unwrap().unwrap().job_id, "42");

    let intruder = RpcClient::new(port, "0000").unwrap();
    assert!(matches!(
        intruder.status().await,
        Err(RpcError::Rejected { status: 401, .. })
    ));

    supervisor.kill();
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert!(supervisor.client().is_none());
}

#[tokio::test]
async fn secret_is_reused_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(
        config_for(dir.path(), 9410, 9429),
        native_locator(dir.path(), &echo_bin()),
        &notifier,
    );

    assert!(supervisor.spawn(None, None).await.unwrap().is_running());
    let first = supervisor.secrets().peek().unwrap().unwrap();
    supervisor.kill();

    assert!(supervisor.spawn(None, None).await.unwrap().is_running());
    let second = supervisor.secrets().peek().unwrap().unwrap();
    assert_eq!(first, second);

    // The restarted worker accepts the persisted secret.
    supervisor.client().unwrap().seed_status().await.unwrap();
}

#[tokio::test]
async fn initial_jobs_reach_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(
        config_for(dir.path(), 9430, 9449),
        native_locator(dir.path(), &echo_bin()),
        &notifier,
    );

    let download = JobPayload::download("1", "https://cdn/game.zip", "/games").with_out("game");
    let seeds = vec![JobPayload::seed("2", "magnet:?xt=urn:btih:def", "/games")];
    supervisor
        .spawn(Some(&download), Some(&seeds))
        .await
        .unwrap();

    let client = supervisor.client().unwrap();
    let status = client.status().await.unwrap().unwrap();
    assert_eq!(status.job_id, "1");
    assert_eq!(status.folder_name.as_deref(), Some("game"));
    assert_eq!(client.seed_status().await.unwrap()[0].job_id, "2");
}

#[tokio::test]
async fn worker_stderr_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(
        config_for(dir.path(), 9450, 9469),
        native_locator(dir.path(), &echo_bin()),
        &notifier,
    );
    supervisor.spawn(None, None).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while supervisor.logs().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(supervisor
        .logs()
        .tail(50)
        .iter()
        .any(|line| line.contains("listening")));
}

#[tokio::test]
async fn missing_worker_disables_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let locator = BinaryLocator::new(Platform::current(), "absent-worker", vec![dir.path().into()])
        .with_script(dir.path().join("python_rpc/main.py"), vec!["sh".into()]);
    let mut supervisor = supervisor(config_for(dir.path(), 9470, 9479), locator, &notifier);

    let outcome = supervisor.spawn(None, None).await.unwrap();
    assert!(matches!(
        outcome,
        SpawnOutcome::DownloadsDisabled {
            reason: RpcError::BinaryNotFound { .. }
        }
    ));
    assert!(supervisor.client().is_none());
    assert_eq!(notifier.notices(), vec![UserNotice::DownloadsUnavailable]);
}

#[tokio::test]
async fn never_healthy_worker_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path(), 9480, 9489);
    config.health_timeout_ms = 600;
    config
        .worker_env
        .insert("WORKER_RPC_ECHO_UNHEALTHY_PROBES".into(), "100000".into());

    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(config, native_locator(dir.path(), &echo_bin()), &notifier);

    let started = Instant::now();
    let err = supervisor.spawn(None, None).await.unwrap_err();
    assert!(matches!(err, RpcError::HealthCheckTimeout(_)));
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert_eq!(supervisor.availability(), Availability::Unresponsive);
    assert!(supervisor.handle().is_none());
    assert!(supervisor.client().is_none());
    assert_eq!(notifier.notices(), vec![UserNotice::ServiceUnresponsive]);
}

#[tokio::test]
async fn kill_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(
        config_for(dir.path(), 9490, 9499),
        native_locator(dir.path(), &echo_bin()),
        &notifier,
    );

    supervisor.kill();
    supervisor.spawn(None, None).await.unwrap();
    supervisor.kill();
    supervisor.kill();

    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert!(supervisor.handle().is_none());
    assert!(!supervisor.check_liveness());
}

#[cfg(unix)]
#[tokio::test]
async fn script_fallback_runs_worker() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("main.py");
    std::fs::write(&script, format!("exec \"{}\" \"$@\"\n", echo_bin().display())).unwrap();

    let locator = BinaryLocator::new(Platform::current(), "absent-worker", vec![dir.path().into()])
        .with_script(&script, vec!["no-such-interpreter-91f2".into(), "sh".into()]);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(config_for(dir.path(), 9500, 9519), locator, &notifier);

    let outcome = supervisor.spawn(None, None).await.unwrap();
    let launch = match outcome {
        SpawnOutcome::Running { launch, .. } => launch,
        other => panic!("script fallback did not start: {other:?}"),
    };
    assert_eq!(
        launch,
        LaunchKind::Script {
            interpreter: "sh".into(),
            script,
        }
    );
    assert!(supervisor.client().unwrap().status().await.unwrap().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn unlaunchable_binary_falls_back_to_script() {
    let dir = tempfile::tempdir().unwrap();
    // Present but not executable, so the spawn itself fails.
    let binary = dir.path().join("blocked-worker");
    std::fs::write(&binary, b"\x7fELF").unwrap();

    let script = dir.path().join("main.py");
    std::fs::write(&script, format!("exec \"{}\" \"$@\"\n", echo_bin().display())).unwrap();

    let locator = native_locator(dir.path(), &binary).with_script(&script, vec!["sh".into()]);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(config_for(dir.path(), 9520, 9539), locator, &notifier);

    let outcome = supervisor.spawn(None, None).await.unwrap();
    assert!(matches!(
        outcome,
        SpawnOutcome::Running {
            launch: LaunchKind::Script { .. },
            ..
        }
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn worker_exiting_early_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("crashing-worker");
    write_executable(&binary, "#!/bin/sh\nexit 3\n");

    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(
        config_for(dir.path(), 9540, 9549),
        native_locator(dir.path(), &binary),
        &notifier,
    );

    let started = Instant::now();
    let err = supervisor.spawn(None, None).await.unwrap_err();
    assert!(matches!(err, RpcError::WorkerExited(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(notifier.notices(), vec![UserNotice::ServiceUnresponsive]);
}

#[cfg(unix)]
#[tokio::test]
async fn liveness_check_notices_dead_worker() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut supervisor = supervisor(
        config_for(dir.path(), 9550, 9569),
        native_locator(dir.path(), &echo_bin()),
        &notifier,
    );
    supervisor.spawn(None, None).await.unwrap();
    assert!(supervisor.check_liveness());

    let pid = supervisor.pid().unwrap();
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }

    let deadline = Instant::now() + Duration::from_secs(3);
    while supervisor.check_liveness() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert_eq!(supervisor.availability(), Availability::Unresponsive);
    assert!(supervisor.client().is_none());
}
