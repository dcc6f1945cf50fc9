//! Minimal worker speaking the control-channel protocol.
//!
//! Accepts the worker positional arguments, serves the loopback HTTP surface
//! and keeps submitted jobs in memory. No transfers happen; jobs only move
//! between states. Used for local development and the integration tests.

use crate::clienv;
use crate::error::{Result, RpcError};
use crate::worker::protocol::{
    action, JobPayload, SeedStatus, TransferStatus, ACTION_PATH, HEALTHCHECK_PATH,
    PASSWORD_HEADER, PROCESS_LIST_PATH, SEED_STATUS_PATH, STATUS_PATH,
};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Parsed positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerArgs {
    pub transport_port: String,
    pub control_port: u16,
    pub secret: String,
    pub initial_download: Option<JobPayload>,
    pub initial_seeds: Vec<JobPayload>,
}

impl WorkerArgs {
    /// `args` excludes the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let [transport_port, control_port, secret, rest @ ..] = args else {
            return Err(RpcError::Config(format!(
                "expected at least 3 arguments (transport port, control port, secret), got {}",
                args.len()
            )));
        };

        let control_port = control_port
            .parse()
            .map_err(|_| RpcError::Config(format!("invalid control port: {}", control_port)))?;

        let initial_download = match rest.first().filter(|s| !s.is_empty()) {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };
        let initial_seeds = match rest.get(1).filter(|s| !s.is_empty()) {
            Some(raw) => serde_json::from_str(raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            transport_port: transport_port.clone(),
            control_port,
            secret: secret.clone(),
            initial_download,
            initial_seeds,
        })
    }
}

#[derive(Default)]
struct Jobs {
    active: Option<TransferStatus>,
    seeding: BTreeMap<String, SeedStatus>,
}

struct EchoState {
    secret: String,
    unhealthy_probes: AtomicU32,
    jobs: Mutex<Jobs>,
}

impl EchoState {
    fn jobs(&self) -> std::sync::MutexGuard<'_, Jobs> {
        self.jobs.lock().expect("echo worker jobs lock poisoned")
    }
}

pub struct EchoWorker {
    args: WorkerArgs,
    state: Arc<EchoState>,
}

impl EchoWorker {
    pub fn new(args: WorkerArgs) -> Self {
        let mut jobs = Jobs::default();
        if let Some(job) = &args.initial_download {
            jobs.active = Some(transfer_for(job));
        }
        for job in &args.initial_seeds {
            jobs.seeding.insert(job.job_id.clone(), seed_for(&job.job_id));
        }

        let state = Arc::new(EchoState {
            secret: args.secret.clone(),
            unhealthy_probes: AtomicU32::new(0),
            jobs: Mutex::new(jobs),
        });
        Self { args, state }
    }

    pub fn with_unhealthy_probes(self, probes: u32) -> Self {
        self.state.unhealthy_probes.store(probes, Ordering::SeqCst);
        self
    }

    /// Initial health probes answered with 503 come from the environment.
    pub fn from_env(args: WorkerArgs) -> Self {
        Self::new(args).with_unhealthy_probes(clienv::echo_unhealthy_probes())
    }

    pub fn args(&self) -> &WorkerArgs {
        &self.args
    }

    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route(ACTION_PATH, post(action_handler))
            .route(STATUS_PATH, get(status_handler))
            .route(SEED_STATUS_PATH, get(seed_status_handler))
            .route(PROCESS_LIST_PATH, get(process_list_handler))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&self.state),
                require_password,
            ));

        Router::new()
            .route(HEALTHCHECK_PATH, get(healthcheck_handler))
            .merge(protected)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on the IPv4 loopback until the process is terminated.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.args.control_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, transport_port = %self.args.transport_port, "Echo worker listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn require_password(
    State(state): State<Arc<EchoState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == state.secret);

    if !authorized {
        warn!(path = %request.uri().path(), "Rejected request without valid password");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    next.run(request).await
}

async fn healthcheck_handler(State(state): State<Arc<EchoState>>) -> StatusCode {
    let failing = state
        .unhealthy_probes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        debug!("Answering health probe as unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn status_handler(State(state): State<Arc<EchoState>>) -> Json<Option<TransferStatus>> {
    Json(state.jobs().active.clone())
}

async fn seed_status_handler(State(state): State<Arc<EchoState>>) -> Json<Vec<SeedStatus>> {
    Json(state.jobs().seeding.values().cloned().collect())
}

async fn process_list_handler() -> Json<Value> {
    Json(json!([{ "pid": std::process::id(), "name": "worker-rpc-echo" }]))
}

async fn action_handler(
    State(state): State<Arc<EchoState>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(name) = body.get("action").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, "missing action").into_response();
    };
    let Some(job_id) = body.get("job_id").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, "missing job_id").into_response();
    };
    info!(action = name, job_id, "Received action");

    let mut jobs = state.jobs();
    match name {
        action::START => match serde_json::from_value::<JobPayload>(body.clone()) {
            Ok(job) => jobs.active = Some(transfer_for(&job)),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        action::PAUSE => {
            if let Some(active) = jobs.active.as_mut().filter(|a| a.job_id == job_id) {
                active.status = Some("paused".to_string());
                active.download_speed = 0.0;
            }
        }
        action::CANCEL => {
            if jobs.active.as_ref().is_some_and(|a| a.job_id == job_id) {
                jobs.active = None;
            }
        }
        action::KILL_TORRENT => {
            if jobs.active.as_ref().is_some_and(|a| a.job_id == job_id) {
                jobs.active = None;
            }
            jobs.seeding.remove(job_id);
        }
        action::RESUME_SEEDING => {
            jobs.seeding.insert(job_id.to_string(), seed_for(job_id));
        }
        action::PAUSE_SEEDING => {
            if let Some(seed) = jobs.seeding.get_mut(job_id) {
                seed.status = Some("paused".to_string());
                seed.upload_speed = 0.0;
            }
        }
        other => {
            return (StatusCode::BAD_REQUEST, format!("unknown action: {}", other)).into_response()
        }
    }

    StatusCode::OK.into_response()
}

fn transfer_for(job: &JobPayload) -> TransferStatus {
    TransferStatus {
        job_id: job.job_id.clone(),
        folder_name: job.out.clone(),
        file_size: job.total_size.unwrap_or(0),
        status: Some("downloading".to_string()),
        ..Default::default()
    }
}

fn seed_for(job_id: &str) -> SeedStatus {
    SeedStatus {
        job_id: job_id.to_string(),
        status: Some("seeding".to_string()),
        ..Default::default()
    }
}
