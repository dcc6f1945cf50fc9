use super::client::RpcClient;
use super::health::HealthGate;
use super::log_buffer::LogBuffer;
use super::notice::{Availability, LogNotifier, Notifier, UserNotice};
use super::protocol::{self, JobPayload};
use crate::config::SupervisorConfig;
use crate::error::{Result, RpcError};
use crate::locator::{BinaryLocator, BinaryResolution};
use crate::port_allocator;
use crate::secret_store::SecretStore;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Spawning,
    AwaitingHealthy,
    Running,
    Stopping,
    Failed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Spawning => "spawning",
            SupervisorState::AwaitingHealthy => "awaiting-healthy",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Failed => "failed",
        }
    }

    /// States from which a new spawn is expected.
    pub fn accepts_spawn(&self) -> bool {
        matches!(self, SupervisorState::Idle | SupervisorState::Failed)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the live worker was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchKind {
    Native { path: PathBuf },
    Script { interpreter: String, script: PathBuf },
}

impl fmt::Display for LaunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchKind::Native { path } => write!(f, "binary {}", path.display()),
            LaunchKind::Script {
                interpreter,
                script,
            } => write!(f, "script fallback {} {}", interpreter, script.display()),
        }
    }
}

#[derive(Debug)]
pub enum SpawnOutcome {
    Running {
        port: u16,
        pid: Option<u32>,
        launch: LaunchKind,
    },
    /// The worker cannot be started; the host keeps running without downloads.
    DownloadsDisabled { reason: RpcError },
}

impl SpawnOutcome {
    pub fn is_running(&self) -> bool {
        matches!(self, SpawnOutcome::Running { .. })
    }
}

/// The single live worker process.
pub struct WorkerHandle {
    child: Child,
    pid: Option<u32>,
    port: u16,
    launch: LaunchKind,
    started_at: Instant,
}

impl WorkerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn launch(&self) -> &LaunchKind {
        &self.launch
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Owns the worker process, its control port and the client bound to it.
///
/// One instance per application run. `spawn` and `kill` are driven from a
/// single control context; the client is only ever bound to the port of the
/// live handle.
pub struct WorkerSupervisor {
    config: SupervisorConfig,
    secrets: SecretStore,
    locator: BinaryLocator,
    gate: HealthGate,
    notifier: Box<dyn Notifier>,
    logs: Arc<LogBuffer>,
    state: SupervisorState,
    availability: Availability,
    handle: Option<WorkerHandle>,
    client: Option<RpcClient>,
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            secrets: SecretStore::file(config.resolved_store_path()),
            locator: BinaryLocator::from_config(&config),
            gate: HealthGate::from_config(&config),
            notifier: Box::new(LogNotifier),
            logs: Arc::new(LogBuffer::default()),
            state: SupervisorState::Idle,
            availability: Availability::Unavailable,
            handle: None,
            client: None,
            config,
        }
    }

    pub fn with_secret_store(mut self, secrets: SecretStore) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_locator(mut self, locator: BinaryLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_health_gate(mut self, gate: HealthGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn with_log_buffer(mut self, logs: Arc<LogBuffer>) -> Self {
        self.logs = logs;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    /// Client for the live worker; `None` unless a worker is running.
    pub fn client(&self) -> Option<&RpcClient> {
        self.client.as_ref()
    }

    pub fn handle(&self) -> Option<&WorkerHandle> {
        self.handle.as_ref()
    }

    pub fn port(&self) -> Option<u16> {
        self.handle.as_ref().map(|h| h.port)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.pid)
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    /// Start the worker and wait until it answers its health check.
    ///
    /// Secret and port are fixed and bound to the client before the process
    /// starts. A missing worker yields `DownloadsDisabled`; a worker that never
    /// becomes healthy is killed and reported as an error.
    pub async fn spawn(
        &mut self,
        initial_download: Option<&JobPayload>,
        initial_seeds: Option<&[JobPayload]>,
    ) -> Result<SpawnOutcome> {
        if !self.state.accepts_spawn() || self.handle.is_some() {
            warn!(
                state = %self.state,
                "Worker spawn requested while not idle, replacing the current worker"
            );
            self.kill();
        }

        self.state = SupervisorState::Spawning;

        let prepared = self.prepare(initial_download, initial_seeds);
        let (port, client, args) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error = %e, "Failed to prepare worker launch");
                self.state = SupervisorState::Failed;
                return Err(e);
            }
        };
        self.client = Some(client.clone());

        let (mut child, launch) = match self.launch(&args).await {
            Ok(launched) => launched,
            Err(reason) => {
                error!(error = %reason, "Worker unavailable, downloads disabled");
                self.client = None;
                self.state = SupervisorState::Failed;
                self.availability = Availability::Unavailable;
                self.notifier.notify(UserNotice::DownloadsUnavailable);
                return Ok(SpawnOutcome::DownloadsDisabled { reason });
            }
        };

        let pid = child.id();
        info!(pid = ?pid, port, launch = %launch, "Worker process spawned");
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr, Arc::clone(&self.logs));
        }

        self.handle = Some(WorkerHandle {
            child,
            pid,
            port,
            launch: launch.clone(),
            started_at: Instant::now(),
        });
        self.state = SupervisorState::AwaitingHealthy;

        let health = match self.handle.as_mut() {
            Some(handle) => {
                tokio::select! {
                    res = self.gate.wait(&client) => res.map(|_| ()),
                    status = handle.child.wait() => Err(RpcError::WorkerExited(match status {
                        Ok(status) => status.to_string(),
                        Err(e) => e.to_string(),
                    })),
                }
            }
            None => Err(RpcError::NotRunning),
        };

        match health {
            Ok(()) => {
                self.state = SupervisorState::Running;
                self.availability = Availability::Ready;
                info!(port, launch = %launch, "Worker started successfully");
                Ok(SpawnOutcome::Running { port, pid, launch })
            }
            Err(e) => {
                error!(error = %e, port, "Failed to start worker");
                self.kill();
                self.state = SupervisorState::Failed;
                self.availability = Availability::Unresponsive;
                self.notifier.notify(UserNotice::ServiceUnresponsive);
                Err(e)
            }
        }
    }

    fn prepare(
        &self,
        initial_download: Option<&JobPayload>,
        initial_seeds: Option<&[JobPayload]>,
    ) -> Result<(u16, RpcClient, Vec<String>)> {
        let secret = self.secrets.get_or_create()?;
        let port = port_allocator::allocate(
            self.config.preferred_port,
            self.config.port_range_start,
            self.config.port_range_end,
        )?;
        info!(port, "Using worker control port");

        let client = RpcClient::new(port, &secret)?;
        let args = protocol::worker_args(
            &self.config.transport_port,
            port,
            &secret,
            initial_download,
            initial_seeds,
        )?;
        Ok((port, client, args))
    }

    /// Native binary first; a binary that fails to start falls back to the script.
    async fn launch(&self, args: &[String]) -> Result<(Child, LaunchKind)> {
        match self.locator.resolve_async().await {
            BinaryResolution::Native { path } => match self.spawn_process(&path, &[], args) {
                Ok(child) => Ok((child, LaunchKind::Native { path })),
                Err(e) => {
                    warn!(error = %e, "Worker binary failed to start, trying script fallback");
                    match self.locator.find_script_async().await {
                        Some((interpreter, script)) => self.launch_script(interpreter, script, args),
                        None => Err(e),
                    }
                }
            },
            BinaryResolution::Script {
                interpreter,
                script,
            } => self.launch_script(interpreter, script, args),
            BinaryResolution::NotFound { searched } => Err(RpcError::BinaryNotFound { searched }),
        }
    }

    fn launch_script(
        &self,
        interpreter: String,
        script: PathBuf,
        args: &[String],
    ) -> Result<(Child, LaunchKind)> {
        let script_arg = script.display().to_string();
        let child = self.spawn_process(Path::new(&interpreter), &[script_arg], args)?;
        Ok((
            child,
            LaunchKind::Script {
                interpreter,
                script,
            },
        ))
    }

    fn spawn_process(&self, program: &Path, pre_args: &[String], args: &[String]) -> Result<Child> {
        spawn_process(program, pre_args, args, &self.config.worker_env)
    }

    /// Terminate the worker and clear the handle without waiting for exit.
    /// Safe to call when nothing is running.
    pub fn kill(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            self.client = None;
            if self.state != SupervisorState::Failed {
                self.state = SupervisorState::Idle;
            }
            return;
        };

        self.state = SupervisorState::Stopping;
        info!(pid = ?handle.pid, port = handle.port, "Killing worker process");
        terminate(&mut handle.child);
        self.client = None;
        self.availability = Availability::Unavailable;
        self.state = SupervisorState::Idle;
    }

    /// Non-blocking exit check for a running worker. Returns `false` and marks
    /// the supervisor failed when the process is gone. Never restarts it.
    pub fn check_liveness(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };

        match handle.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(pid = ?handle.pid, %status, "Worker exited unexpectedly");
                self.handle = None;
                self.client = None;
                self.state = SupervisorState::Failed;
                self.availability = Availability::Unresponsive;
                false
            }
            Err(e) => {
                debug!(error = %e, "Could not query worker status");
                true
            }
        }
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn_process(
    program: &Path,
    pre_args: &[String],
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(pre_args)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.spawn().map_err(|source| RpcError::SpawnFailed {
        command: program.display().to_string(),
        source,
    })
}

/// SIGTERM on Unix, hard kill elsewhere. Does not wait for the exit.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Worker already gone");
        }
    }
}

/// Fire-and-forget forwarding of worker stderr into tracing and the log buffer.
/// Invalid UTF-8 is replaced, never fatal: the read end stays open until EOF
/// so the worker cannot hit a broken pipe on stderr.
fn forward_stderr<R>(stderr: R, logs: Arc<LogBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    info!(target: "worker_rpc::worker", "{}", line);
                    logs.push(line);
                }
                Err(e) => {
                    debug!(error = %e, "Worker stderr read failed");
                    break;
                }
            }
        }
    })
}
