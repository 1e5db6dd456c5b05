//! In-process shell for an already privileged process.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{BlockerError, Result};

use super::{RootShell, ShellOutput};

/// Runs commands with the current process's credentials.
///
/// Used when blocker itself runs as root (`adb root`, an init service) and
/// against mirror directories. Root availability is the effective uid
/// unless pinned with [`DirectShell::with_root`].
pub struct DirectShell {
    timeout: Duration,
    root_override: Option<bool>,
}

impl DirectShell {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.max(1)),
            root_override: None,
        }
    }

    /// Pin the answer of `is_root_available`.
    pub fn with_root(mut self, available: bool) -> Self {
        self.root_override = Some(available);
        self
    }
}

#[async_trait]
impl RootShell for DirectShell {
    async fn is_root_available(&self) -> bool {
        match self.root_override {
            Some(available) => available,
            // SAFETY: geteuid has no preconditions and cannot fail.
            None => unsafe { libc::geteuid() == 0 },
        }
    }

    async fn exec(&self, command: &str) -> Result<ShellOutput> {
        debug!(shell = "direct", command = %command, "Executing command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                BlockerError::Shell(format!(
                    "'{}' timed out after {}s",
                    command,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| BlockerError::Shell(format!("Failed to spawn sh: {}", e)))?;
        Ok(ShellOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn read_file(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| BlockerError::Shell(format!("{} has no parent", path.display())))?
            .to_path_buf();
        let dest = path.to_path_buf();
        let contents = contents.to_string();

        // Stage next to the destination so the rename is atomic.
        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            std::fs::create_dir_all(&parent)?;
            let mut staged = tempfile::NamedTempFile::new_in(&parent)?;
            staged.write_all(contents.as_bytes())?;
            staged.flush()?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(mode))?;
            }
            staged
                .persist(&dest)
                .map_err(|e| BlockerError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| BlockerError::Shell(format!("write task failed: {}", e)))?
    }

    async fn remove_file(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn name(&self) -> &str {
        "direct"
    }
}
