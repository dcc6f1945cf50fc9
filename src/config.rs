use crate::clienv;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TRANSPORT_PORT: &str = "5881";
pub const DEFAULT_RPC_PORT: u16 = 8084;
pub const RPC_PORT_RANGE_START: u16 = 8080;
pub const RPC_PORT_RANGE_END: u16 = 9000;
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 100;
pub const HEALTH_CHECK_TIMEOUT_MS: u64 = 10_000;
pub const HEALTH_PROBE_TIMEOUT_MS: u64 = 80;

const DEFAULT_SCRIPT_SUBPATH: &str = "python_rpc/main.py";

pub const DEFAULT_BINARY_STEM: &str = "worker-rpc-worker";

pub fn default_interpreters() -> Vec<String> {
    if cfg!(windows) {
        vec!["python".to_string()]
    } else {
        vec!["python3".to_string(), "python".to_string()]
    }
}

/// Everything the supervisor needs to locate, launch and probe the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Low-level transfer port handed to the worker as its first argument
    pub transport_port: String,
    /// Control port tried before scanning the range
    pub preferred_port: u16,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub health_interval_ms: u64,
    pub health_timeout_ms: u64,
    /// Per-probe request timeout; always kept below the interval
    pub probe_timeout_ms: u64,
    /// Binary stem; `.exe` is appended on Windows
    pub binary_name: String,
    /// Folders under the resources directory that may hold the binary
    pub binary_folders: Vec<String>,
    pub resources_dir: Option<PathBuf>,
    /// Fallback entry script, relative to the resources directory
    pub script_subpath: PathBuf,
    /// Entry script used when running from a development checkout
    pub dev_script: Option<PathBuf>,
    pub interpreters: Vec<String>,
    /// Packaged installs search for a native binary first
    pub packaged: bool,
    pub binary_override: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
    /// Endpoint serving `{ version, downloadUrl }` for the worker release
    pub release_url: Option<String>,
    /// Extra environment variables set on the worker process
    pub worker_env: BTreeMap<String, String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            transport_port: DEFAULT_TRANSPORT_PORT.to_string(),
            preferred_port: DEFAULT_RPC_PORT,
            port_range_start: RPC_PORT_RANGE_START,
            port_range_end: RPC_PORT_RANGE_END,
            health_interval_ms: HEALTH_CHECK_INTERVAL_MS,
            health_timeout_ms: HEALTH_CHECK_TIMEOUT_MS,
            probe_timeout_ms: HEALTH_PROBE_TIMEOUT_MS,
            binary_name: DEFAULT_BINARY_STEM.to_string(),
            binary_folders: vec!["worker-rpc".to_string(), "download-worker".to_string()],
            resources_dir: None,
            script_subpath: PathBuf::from(DEFAULT_SCRIPT_SUBPATH),
            dev_script: None,
            interpreters: default_interpreters(),
            packaged: true,
            binary_override: None,
            store_path: None,
            release_url: None,
            worker_env: BTreeMap::new(),
        }
    }
}

impl SupervisorConfig {
    /// $WORKER_RPC_CONFIG_DIR/config.toml or ~/.config/worker-rpc/config.toml
    pub fn config_path() -> PathBuf {
        clienv::config_dir().join("config.toml")
    }

    /// Load the config file (defaults when absent) and apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading supervisor config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            RpcError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "Saving supervisor config");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| RpcError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Some(dir) = clienv::resources_dir() {
            self.resources_dir = Some(dir);
        }
        if let Some(binary) = clienv::binary_override() {
            self.binary_override = Some(binary);
        }
        if let Some(packaged) = clienv::packaged() {
            self.packaged = packaged;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_range_start > self.port_range_end {
            return Err(RpcError::Config(format!(
                "port range start {} is above end {}",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.health_interval_ms == 0 {
            return Err(RpcError::Config("health interval must be non-zero".into()));
        }
        if self.interpreters.is_empty() {
            return Err(RpcError::Config("at least one interpreter is required".into()));
        }
        Ok(())
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// A hung probe must never outlive one polling interval.
    pub fn probe_timeout(&self) -> Duration {
        let interval = self.health_interval_ms.max(1);
        let probe = if self.probe_timeout_ms == 0 || self.probe_timeout_ms >= interval {
            (interval * 4 / 5).max(1)
        } else {
            self.probe_timeout_ms
        };
        Duration::from_millis(probe)
    }

    /// Resources directory: config, then env, then the executable's directory.
    pub fn resolved_resources_dir(&self) -> PathBuf {
        self.resources_dir
            .clone()
            .or_else(clienv::exe_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Installation directories that may contain the native binary.
    pub fn candidate_dirs(&self) -> Vec<PathBuf> {
        let resources = self.resolved_resources_dir();
        let mut dirs: Vec<PathBuf> = self
            .binary_folders
            .iter()
            .map(|folder| resources.join(folder))
            .collect();
        dirs.push(resources);
        dirs
    }

    /// Entry script for the interpreter fallback in the current mode.
    pub fn script_path(&self) -> PathBuf {
        if self.packaged {
            return self.resolved_resources_dir().join(&self.script_subpath);
        }
        self.dev_script
            .clone()
            .unwrap_or_else(|| self.script_subpath.clone())
    }

    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(clienv::store_path)
    }
}
