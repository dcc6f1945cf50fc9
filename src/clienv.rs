use std::path::PathBuf;

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const APP_SUBDIR: &str = "worker-rpc";

pub const ENV_CONFIG_DIR: &str = "WORKER_RPC_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "WORKER_RPC_DATA_DIR";
pub const ENV_RESOURCES_DIR: &str = "WORKER_RPC_RESOURCES_DIR";
pub const ENV_BINARY: &str = "WORKER_RPC_BINARY";
pub const ENV_PACKAGED: &str = "WORKER_RPC_PACKAGED";
pub const ENV_ECHO_UNHEALTHY_PROBES: &str = "WORKER_RPC_ECHO_UNHEALTHY_PROBES";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Config directory ($WORKER_RPC_CONFIG_DIR or ~/.config/worker-rpc)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(ENV_CONFIG_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(APP_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Data directory ($WORKER_RPC_DATA_DIR or ~/.local/share/worker-rpc)
pub fn data_dir() -> PathBuf {
    let dir = env_opt(ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
                .join(APP_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved data directory");
    dir
}

/// Key-value store backing the shared secret
pub fn store_path() -> PathBuf {
    data_dir().join("store.json")
}

/// Application resources directory override ($WORKER_RPC_RESOURCES_DIR)
pub fn resources_dir() -> Option<PathBuf> {
    let val = env_opt(ENV_RESOURCES_DIR).map(PathBuf::from);
    tracing::trace!(value = ?val, "WORKER_RPC_RESOURCES_DIR env var");
    val
}

/// Explicit worker binary ($WORKER_RPC_BINARY)
pub fn binary_override() -> Option<PathBuf> {
    let val = env_opt(ENV_BINARY).map(PathBuf::from);
    tracing::trace!(value = ?val, "WORKER_RPC_BINARY env var");
    val
}

/// Packaged-mode override ($WORKER_RPC_PACKAGED)
pub fn packaged() -> Option<bool> {
    let val = env_opt(ENV_PACKAGED).map(|v| is_truthy(&v));
    tracing::trace!(value = ?val, "WORKER_RPC_PACKAGED env var");
    val
}

/// Health probes the echo worker fails before answering OK ($WORKER_RPC_ECHO_UNHEALTHY_PROBES)
pub fn echo_unhealthy_probes() -> u32 {
    let val = env_opt(ENV_ECHO_UNHEALTHY_PROBES)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    tracing::trace!(value = val, "WORKER_RPC_ECHO_UNHEALTHY_PROBES env var");
    val
}

/// Directory holding the running executable; packaged installs keep resources beside it.
pub fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" TRUE "));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_store_path_under_data_dir() {
        assert!(store_path().starts_with(data_dir()));
        assert!(store_path().ends_with("store.json"));
    }
}
