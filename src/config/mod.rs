//! Configuration loading.
//!
//! The config file lives at `~/.blocker/config.json`. Missing fields take
//! their defaults, and `BLOCKER_*` environment variables override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BlockerError, Result};

/// Directory the Android Intent Firewall reads rule files from.
pub const DEFAULT_IFW_DIR: &str = "/data/system/ifw";

/// Which mechanism is used to disable components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Intent Firewall rule files.
    #[default]
    Ifw,
    /// `pm enable` / `pm disable`.
    Pm,
}

impl FromStr for ControllerKind {
    type Err = BlockerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ifw" => Ok(ControllerKind::Ifw),
            "pm" => Ok(ControllerKind::Pm),
            other => Err(BlockerError::Config(format!(
                "unknown controller '{}'. Use: ifw, pm",
                other
            ))),
        }
    }
}

/// How privileged commands are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellMode {
    /// Escalate each command with `su -c`.
    #[default]
    Su,
    /// Run in-process; blocker is already privileged.
    Direct,
}

impl FromStr for ShellMode {
    type Err = BlockerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "su" => Ok(ShellMode::Su),
            "direct" => Ok(ShellMode::Direct),
            other => Err(BlockerError::Config(format!(
                "unknown shell mode '{}'. Use: su, direct",
                other
            ))),
        }
    }
}

/// Root shell settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub mode: ShellMode,
    /// `su` binary to invoke in `su` mode.
    pub su_path: String,
    /// Per-command timeout.
    pub timeout_secs: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: ShellMode::Su,
            su_path: "su".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Intent Firewall rule directory.
    pub ifw_dir: PathBuf,
    /// Staging area for rule files before the root copy.
    pub cache_dir: PathBuf,
    pub controller: ControllerKind,
    /// Android user the PM controller acts on.
    pub user_id: u32,
    pub shell: ShellConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ifw_dir: PathBuf::from(DEFAULT_IFW_DIR),
            cache_dir: Self::dir().join("cache"),
            controller: ControllerKind::Ifw,
            user_id: 0,
            shell: ShellConfig::default(),
        }
    }
}

impl Config {
    /// `~/.blocker`
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".blocker")
    }

    /// `~/.blocker/config.json`
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load the default config file and apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_env(&Self::path())
    }

    /// Load `path` and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_path(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load `path` without environment overrides. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                BlockerError::Config(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(BlockerError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply `BLOCKER_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("BLOCKER_IFW_DIR") {
            self.ifw_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("BLOCKER_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(kind) = get("BLOCKER_CONTROLLER") {
            self.controller = kind.parse()?;
        }
        if let Some(mode) = get("BLOCKER_SHELL_MODE") {
            self.shell.mode = mode.parse()?;
        }
        if let Some(su) = get("BLOCKER_SU_PATH") {
            self.shell.su_path = su;
        }
        if let Some(user) = get("BLOCKER_USER_ID") {
            self.user_id = user.trim().parse().map_err(|_| {
                BlockerError::Config(format!("BLOCKER_USER_ID '{}' is not a number", user))
            })?;
        }
        if let Some(secs) = get("BLOCKER_SHELL_TIMEOUT_SECS") {
            self.shell.timeout_secs = secs.trim().parse().map_err(|_| {
                BlockerError::Config(format!(
                    "BLOCKER_SHELL_TIMEOUT_SECS '{}' is not a number",
                    secs
                ))
            })?;
        }
        Ok(())
    }
}
