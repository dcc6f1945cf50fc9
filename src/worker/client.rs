use super::health::HealthProbe;
use super::protocol::{
    action, JobCommand, JobPayload, SeedStatus, TransferStatus, ACTION_PATH, HEALTHCHECK_PATH,
    PASSWORD_HEADER, PROCESS_LIST_PATH, SEED_STATUS_PATH, STATUS_PATH,
};
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, trace};

/// Pre-authenticated client for one worker instance.
///
/// `localhost` is pinned to the IPv4 loopback so hosts whose resolver puts
/// `::1` first still reach the worker. No retries happen here.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    port: u16,
}

impl RpcClient {
    pub fn new(port: u16, secret: &str) -> Result<Self> {
        let mut password = HeaderValue::from_str(secret)
            .map_err(|e| RpcError::Config(format!("secret is not a valid header value: {}", e)))?;
        password.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(PASSWORD_HEADER, password);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .resolve("localhost", SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .no_proxy()
            .build()?;

        Ok(Self {
            http,
            base_url: format!("http://localhost:{}", port),
            port,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Single health probe bounded by `timeout`.
    pub async fn healthcheck(&self, timeout: Duration) -> Result<bool> {
        let response = self
            .http
            .get(self.url(HEALTHCHECK_PATH))
            .timeout(timeout)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    pub async fn start_download(&self, job: &JobPayload) -> Result<()> {
        let job = job.clone().with_action(action::START);
        self.post_action(&job).await
    }

    /// Resuming re-submits the job; the worker picks up existing data.
    pub async fn resume(&self, job: &JobPayload) -> Result<()> {
        self.start_download(job).await
    }

    pub async fn pause(&self, job_id: &str) -> Result<()> {
        self.post_action(&JobCommand::new(action::PAUSE, job_id))
            .await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        self.post_action(&JobCommand::new(action::CANCEL, job_id))
            .await
    }

    pub async fn kill_torrent(&self, job_id: &str) -> Result<()> {
        self.post_action(&JobCommand::new(action::KILL_TORRENT, job_id))
            .await
    }

    pub async fn seed(&self, job: &JobPayload) -> Result<()> {
        let job = job.clone().with_action(action::RESUME_SEEDING);
        self.post_action(&job).await
    }

    pub async fn pause_seeding(&self, job_id: &str) -> Result<()> {
        self.post_action(&JobCommand::new(action::PAUSE_SEEDING, job_id))
            .await
    }

    /// Active transfer, `None` when the worker is idle.
    pub async fn status(&self) -> Result<Option<TransferStatus>> {
        self.get_json(STATUS_PATH).await
    }

    pub async fn seed_status(&self) -> Result<Vec<SeedStatus>> {
        self.get_json(SEED_STATUS_PATH).await
    }

    pub async fn process_list(&self) -> Result<Vec<serde_json::Value>> {
        self.get_json(PROCESS_LIST_PATH).await
    }

    async fn post_action<T: Serialize + ?Sized>(&self, body: &T) -> Result<()> {
        let response = self
            .http
            .post(self.url(ACTION_PATH))
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        debug!(port = self.port, status = %response.status(), "Worker action accepted");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RpcError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl HealthProbe for RpcClient {
    async fn probe(&self, timeout: Duration) -> bool {
        match self.healthcheck(timeout).await {
            Ok(healthy) => healthy,
            Err(e) => {
                trace!(port = self.port, error = %e, "Health probe failed");
                false
            }
        }
    }
}
