//! Worker release metadata and installation into the resources directory.

use crate::error::{Result, RpcError};
use crate::locator::Platform;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

const USER_AGENT: &str = "worker-rpc-installer";
const VERSION_FILE: &str = ".version";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}

impl ReleaseInfo {
    /// Last path segment of the download URL, used to pick the extractor.
    pub fn asset_name(&self) -> &str {
        let path = self
            .download_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        path.rsplit('/').next().unwrap_or(path)
    }
}

/// Release endpoint with a process-lifetime cache. Only successful lookups
/// are cached.
pub struct ReleaseChannel {
    url: String,
    http: reqwest::Client,
    cached: Mutex<Option<ReleaseInfo>>,
}

impl ReleaseChannel {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            url: url.into(),
            http,
            cached: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn latest(&self) -> Result<ReleaseInfo> {
        let mut cached = self.cached.lock().await;
        if let Some(info) = cached.as_ref() {
            return Ok(info.clone());
        }

        let info = self.fetch().await.inspect_err(|e| {
            warn!(url = %self.url, error = %e, "Failed to fetch worker release info");
        })?;
        debug!(version = %info.version, "Fetched worker release info");
        *cached = Some(info.clone());
        Ok(info)
    }

    async fn fetch(&self) -> Result<ReleaseInfo> {
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(RpcError::Release(format!(
                "release endpoint returned status: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RpcError::Release(format!("failed to parse release JSON: {}", e)))
    }
}

/// Downloads a worker release and places the binary in an install directory.
pub struct WorkerInstaller {
    binary_name: String,
    http: reqwest::Client,
    show_progress: bool,
}

impl WorkerInstaller {
    pub fn new(binary_stem: &str) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            binary_name: Platform::current().binary_name(binary_stem),
            http,
            show_progress: true,
        })
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    /// Version recorded by the last successful install, if any.
    pub fn installed_version(install_dir: &Path) -> Option<String> {
        std::fs::read_to_string(install_dir.join(VERSION_FILE))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Install `release` unless the recorded version is already current.
    /// Returns the binary path when something was installed.
    pub async fn install_if_newer(
        &self,
        release: &ReleaseInfo,
        install_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        if let Some(current) = Self::installed_version(install_dir) {
            if !version_is_newer(&release.version, &current) {
                info!(version = %current, "Worker is up to date");
                return Ok(None);
            }
            info!(from = %current, to = %release.version, "Updating worker");
        }
        self.install(release, install_dir).await.map(Some)
    }

    pub async fn install(&self, release: &ReleaseInfo, install_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(install_dir).await?;
        let target = install_dir.join(&self.binary_name);

        let bytes = self.download(&release.download_url).await?;
        let asset = release.asset_name();
        if asset.ends_with(".tar.gz") || asset.ends_with(".tgz") {
            self.extract_tar_gz(&bytes, &target)?;
        } else if asset.ends_with(".zip") {
            self.extract_zip(&bytes, &target)?;
        } else {
            tokio::fs::write(&target, &bytes).await?;
        }

        make_executable(&target)?;
        tokio::fs::write(install_dir.join(VERSION_FILE), release.version.as_bytes()).await?;
        info!(path = %target.display(), version = %release.version, "Installed worker");
        Ok(target)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(RpcError::Release(format!(
                "download returned status: {}",
                response.status()
            )));
        }

        let pb = if self.show_progress {
            progress_bar(response.content_length())
        } else {
            ProgressBar::hidden()
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            bytes.extend_from_slice(&chunk);
            pb.set_position(bytes.len() as u64);
        }
        pb.finish_with_message("downloaded");
        Ok(bytes)
    }

    fn extract_tar_gz(&self, bytes: &[u8], target: &Path) -> Result<()> {
        let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));

        for entry in archive
            .entries()
            .map_err(|e| RpcError::Release(format!("failed to read tar archive: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| RpcError::Release(format!("failed to read tar entry: {}", e)))?;
            let matches = entry
                .path()
                .map_err(|e| RpcError::Release(format!("failed to read entry path: {}", e)))?
                .file_name()
                .is_some_and(|name| name == self.binary_name.as_str());

            if matches {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                std::fs::write(target, buffer)?;
                return Ok(());
            }
        }

        Err(self.missing_binary())
    }

    fn extract_zip(&self, bytes: &[u8], target: &Path) -> Result<()> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| RpcError::Release(format!("failed to read zip archive: {}", e)))?;

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| RpcError::Release(format!("failed to read zip entry: {}", e)))?;
            let matches = Path::new(file.name())
                .file_name()
                .is_some_and(|name| name == self.binary_name.as_str());

            if matches {
                let mut buffer = Vec::new();
                file.read_to_end(&mut buffer)?;
                std::fs::write(target, buffer)?;
                return Ok(());
            }
        }

        Err(self.missing_binary())
    }

    fn missing_binary(&self) -> RpcError {
        RpcError::Release(format!("binary '{}' not found in archive", self.binary_name))
    }
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        }
        None => ProgressBar::new_spinner(),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Dotted numeric comparison; a leading `v` is ignored.
pub fn version_is_newer(latest: &str, current: &str) -> bool {
    let parse = |v: &str| -> Vec<u32> {
        v.trim_start_matches('v')
            .split('.')
            .filter_map(|s| s.parse().ok())
            .collect()
    };

    let latest = parse(latest);
    let current = parse(current);
    for (l, c) in latest.iter().zip(current.iter()) {
        if l != c {
            return l > c;
        }
    }
    latest.len() > current.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn installer() -> WorkerInstaller {
        WorkerInstaller::new("worker").unwrap().quiet()
    }

    fn tar_gz_with(name: &str, data: &[u8]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_version_comparison() {
        assert!(version_is_newer("1.2.0", "1.1.9"));
        assert!(version_is_newer("v2.0", "1.9.9"));
        assert!(version_is_newer("1.0.1", "1.0"));
        assert!(!version_is_newer("1.0.0", "1.0.0"));
        assert!(!version_is_newer("0.9", "1.0"));
    }

    #[test]
    fn test_asset_name_ignores_query() {
        let info = ReleaseInfo {
            version: "1.0.0".into(),
            download_url: "https://cdn.example.com/w/worker-linux.tar.gz?sig=abc".into(),
        };
        assert_eq!(info.asset_name(), "worker-linux.tar.gz");
    }

    #[test]
    fn test_release_info_wire_names() {
        let info: ReleaseInfo =
            serde_json::from_str(r#"{"version":"3.1.0","downloadUrl":"https://x/y.zip"}"#).unwrap();
        assert_eq!(info.download_url, "https://x/y.zip");
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_tar_gz_finds_nested_binary() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("worker");
        let archive = tar_gz_with("dist/bin/worker", b"binary");

        installer().extract_tar_gz(&archive, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"binary");
    }

    #[test]
    fn test_extract_tar_gz_without_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tar_gz_with("README.md", b"hello");
        let err = installer()
            .extract_tar_gz(&archive, &dir.path().join("worker"))
            .unwrap_err();
        assert!(matches!(err, RpcError::Release(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_zip() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("pkg/worker", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(b"zipped").unwrap();
            zip.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("worker");
        installer().extract_zip(buf.get_ref(), &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"zipped");
    }

    #[test]
    fn test_installed_version_reads_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(WorkerInstaller::installed_version(dir.path()), None);
        std::fs::write(dir.path().join(VERSION_FILE), "1.4.2\n").unwrap();
        assert_eq!(
            WorkerInstaller::installed_version(dir.path()).as_deref(),
            Some("1.4.2")
        );
    }

    #[tokio::test]
    async fn test_channel_caches_success_only() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/release",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(ReleaseInfo {
                        version: "2.0.0".into(),
                        download_url: "http://127.0.0.1/worker".into(),
                    })
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let missing = ReleaseChannel::new(format!("http://{}/missing", addr)).unwrap();
        assert!(missing.latest().await.is_err());
        assert!(missing.latest().await.is_err());

        let channel = ReleaseChannel::new(format!("http://{}/release", addr)).unwrap();
        assert_eq!(channel.latest().await.unwrap().version, "2.0.0");
        assert_eq!(channel.latest().await.unwrap().version, "2.0.0");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_raw_binary_sets_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let app = Router::new().route("/worker", get(|| async { "#!/bin/sh\necho hi\n" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let dir = tempfile::tempdir().unwrap();
        let release = ReleaseInfo {
            version: "1.0.0".into(),
            download_url: format!("http://{}/worker", addr),
        };
        let path = installer()
            .install_if_newer(&release, dir.path())
            .await
            .unwrap()
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
        assert!(installer()
            .install_if_newer(&release, dir.path())
            .await
            .unwrap()
            .is_none());
    }
}
