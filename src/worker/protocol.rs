//! Wire types for the worker's loopback HTTP control channel.

use serde::{Deserialize, Serialize};

/// Header carrying the shared secret on every command.
pub const PASSWORD_HEADER: &str = "x-worker-rpc-password";

pub const HEALTHCHECK_PATH: &str = "/healthcheck";
pub const ACTION_PATH: &str = "/action";
pub const STATUS_PATH: &str = "/status";
pub const SEED_STATUS_PATH: &str = "/seed-status";
pub const PROCESS_LIST_PATH: &str = "/process-list";

/// Actions understood by `POST /action`.
pub mod action {
    pub const START: &str = "start";
    pub const PAUSE: &str = "pause";
    pub const CANCEL: &str = "cancel";
    pub const KILL_TORRENT: &str = "kill-torrent";
    pub const PAUSE_SEEDING: &str = "pause-seeding";
    pub const RESUME_SEEDING: &str = "resume-seeding";
}

/// One source URL or a list of mirrors/parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobUrl {
    Single(String),
    Multiple(Vec<String>),
}

impl JobUrl {
    pub fn first(&self) -> Option<&str> {
        match self {
            JobUrl::Single(url) => Some(url.as_str()),
            JobUrl::Multiple(urls) => urls.first().map(String::as_str),
        }
    }
}

impl From<&str> for JobUrl {
    fn from(url: &str) -> Self {
        JobUrl::Single(url.to_string())
    }
}

impl From<String> for JobUrl {
    fn from(url: String) -> Self {
        JobUrl::Single(url)
    }
}

impl From<Vec<String>> for JobUrl {
    fn from(urls: Vec<String>) -> Self {
        JobUrl::Multiple(urls)
    }
}

/// Structured job description for start and seed operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub action: String,
    pub job_id: String,
    pub url: JobUrl,
    pub save_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
}

impl JobPayload {
    pub fn download(job_id: impl Into<String>, url: impl Into<JobUrl>, save_path: impl Into<String>) -> Self {
        Self {
            action: action::START.to_string(),
            job_id: job_id.into(),
            url: url.into(),
            save_path: save_path.into(),
            header: None,
            out: None,
            total_size: None,
        }
    }

    pub fn seed(job_id: impl Into<String>, url: impl Into<JobUrl>, save_path: impl Into<String>) -> Self {
        Self {
            action: action::RESUME_SEEDING.to_string(),
            ..Self::download(job_id, url, save_path)
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_out(mut self, out: impl Into<String>) -> Self {
        self.out = Some(out.into());
        self
    }

    pub fn with_total_size(mut self, total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = action.to_string();
        self
    }
}

/// Commands that only reference a job by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCommand {
    pub action: String,
    pub job_id: String,
}

impl JobCommand {
    pub fn new(action: &str, job_id: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            job_id: job_id.into(),
        }
    }
}

/// Progress of the active transfer as reported by `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub job_id: String,
    #[serde(default)]
    pub folder_name: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub bytes_downloaded: u64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub download_speed: f64,
    #[serde(default)]
    pub upload_speed: f64,
    #[serde(default)]
    pub num_peers: u32,
    #[serde(default)]
    pub num_seeds: u32,
    #[serde(default)]
    pub status: Option<String>,
}

/// Entry of `GET /seed-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SeedStatus {
    pub job_id: String,
    #[serde(default)]
    pub upload_speed: f64,
    #[serde(default)]
    pub num_peers: u32,
    #[serde(default)]
    pub status: Option<String>,
}

/// Positional arguments for the worker: transport port, control port,
/// secret, initial download JSON, initial seeds JSON. Absent payloads are
/// passed as empty strings.
pub fn worker_args(
    transport_port: &str,
    control_port: u16,
    secret: &str,
    initial_download: Option<&JobPayload>,
    initial_seeds: Option<&[JobPayload]>,
) -> serde_json::Result<Vec<String>> {
    let download = match initial_download {
        Some(job) => serde_json::to_string(job)?,
        None => String::new(),
    };
    let seeds = match initial_seeds {
        Some(jobs) => serde_json::to_string(jobs)?,
        None => String::new(),
    };

    Ok(vec![
        transport_port.to_string(),
        control_port.to_string(),
        secret.to_string(),
        download,
        seeds,
    ])
}
