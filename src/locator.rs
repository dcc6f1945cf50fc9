//! Resolves how the worker gets launched: a native binary from one of the
//! install locations, or an interpreter running the bundled entry script.

use crate::config::SupervisorConfig;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Executable file name for a binary stem on this platform.
    pub fn binary_name(&self, stem: &str) -> String {
        match self {
            Platform::Windows if !stem.ends_with(".exe") => format!("{}.exe", stem),
            _ => stem.to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOs => "darwin",
            Platform::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryResolution {
    Native { path: PathBuf },
    Script { interpreter: String, script: PathBuf },
    NotFound { searched: Vec<PathBuf> },
}

impl BinaryResolution {
    pub fn is_found(&self) -> bool {
        !matches!(self, BinaryResolution::NotFound { .. })
    }
}

impl fmt::Display for BinaryResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryResolution::Native { path } => write!(f, "native {}", path.display()),
            BinaryResolution::Script {
                interpreter,
                script,
            } => write!(f, "script {} {}", interpreter, script.display()),
            BinaryResolution::NotFound { searched } => {
                write!(f, "not found ({} locations searched)", searched.len())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinaryLocator {
    platform: Platform,
    binary_stem: String,
    candidate_dirs: Vec<PathBuf>,
    binary_override: Option<PathBuf>,
    script: Option<PathBuf>,
    interpreters: Vec<String>,
    search_native: bool,
}

impl BinaryLocator {
    pub fn new(platform: Platform, binary_stem: &str, candidate_dirs: Vec<PathBuf>) -> Self {
        Self {
            platform,
            binary_stem: binary_stem.to_string(),
            candidate_dirs,
            binary_override: None,
            script: None,
            interpreters: Vec::new(),
            search_native: true,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        let mut locator = Self::new(
            Platform::current(),
            &config.binary_name,
            config.candidate_dirs(),
        )
        .with_script(config.script_path(), config.interpreters.clone());
        locator.binary_override = config.binary_override.clone();
        locator.search_native = config.packaged;
        locator
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>, interpreters: Vec<String>) -> Self {
        self.script = Some(script.into());
        self.interpreters = interpreters;
        self
    }

    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_override = Some(path.into());
        self
    }

    /// Development checkouts skip the native lookup and go straight to the script.
    pub fn script_only(mut self) -> Self {
        self.search_native = false;
        self
    }

    pub fn binary_name(&self) -> String {
        self.platform.binary_name(&self.binary_stem)
    }

    fn native_candidates(&self) -> Vec<PathBuf> {
        let name = self.binary_name();
        let mut candidates = Vec::new();
        if let Some(path) = &self.binary_override {
            candidates.push(path.clone());
        }
        candidates.extend(self.candidate_dirs.iter().map(|dir| dir.join(&name)));
        candidates
    }

    /// First existing native binary, if any.
    pub fn find_binary(&self) -> Option<PathBuf> {
        if !self.search_native {
            return None;
        }
        self.native_candidates().into_iter().find(|candidate| {
            let found = candidate.is_file();
            if found {
                debug!(path = %candidate.display(), "Found worker binary");
            }
            found
        })
    }

    /// Entry script plus the first interpreter that can actually be spawned.
    pub fn find_script(&self) -> Option<(String, PathBuf)> {
        let script = self.script.as_ref()?;
        if !script.is_file() {
            debug!(path = %script.display(), "Fallback script not present");
            return None;
        }

        for interpreter in &self.interpreters {
            if interpreter_is_invocable(interpreter) {
                debug!(interpreter = %interpreter, script = %script.display(), "Using script fallback");
                return Some((interpreter.clone(), script.clone()));
            }
            debug!(interpreter = %interpreter, "Interpreter could not be spawned");
        }

        warn!(
            script = %script.display(),
            interpreters = ?self.interpreters,
            "Fallback script present but no interpreter is invocable"
        );
        None
    }

    /// Never fails: a missing worker is reported as `NotFound`.
    pub fn resolve(&self) -> BinaryResolution {
        if let Some(path) = self.find_binary() {
            return BinaryResolution::Native { path };
        }

        if let Some((interpreter, script)) = self.find_script() {
            return BinaryResolution::Script {
                interpreter,
                script,
            };
        }

        let mut searched = if self.search_native {
            self.native_candidates()
        } else {
            Vec::new()
        };
        if let Some(script) = &self.script {
            searched.push(script.clone());
        }
        warn!(?searched, "Worker binary and fallback script not found");
        BinaryResolution::NotFound { searched }
    }

    /// `resolve` on the blocking pool, keeping interpreter probes off the async runtime.
    pub async fn resolve_async(&self) -> BinaryResolution {
        let locator = self.clone();
        match tokio::task::spawn_blocking(move || locator.resolve()).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(error = %e, "Worker resolution task failed");
                BinaryResolution::NotFound {
                    searched: Vec::new(),
                }
            }
        }
    }

    /// `find_script` on the blocking pool.
    pub async fn find_script_async(&self) -> Option<(String, PathBuf)> {
        let locator = self.clone();
        match tokio::task::spawn_blocking(move || locator.find_script()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Script lookup task failed");
                None
            }
        }
    }
}

/// Spawn the interpreter bare and reap it; success of the spawn itself is the signal.
/// Blocks while the probe child is reaped.
pub fn interpreter_is_invocable(command: &str) -> bool {
    let spawned = Command::new(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(mut child) => {
            // The probe may already have exited on its own.
            if let Err(e) = child.kill() {
                debug!(interpreter = %command, error = %e, "Interpreter probe already exited");
            }
            if let Err(e) = child.wait() {
                debug!(interpreter = %command, error = %e, "Failed to reap interpreter probe");
            }
            true
        }
        Err(_) => false,
    }
}
