//! `su -c` backed root shell.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{BlockerError, Result};

use super::{quote_path, RootShell, ShellOutput};

/// Exit status used by `read_file` to report a missing file.
const MISSING_FILE_STATUS: i32 = 44;

/// Runs every command through `su -c`.
///
/// The root check (`id -u`) is executed once and cached; a denied or
/// missing `su` is reported as "root unavailable" rather than an error.
pub struct SuShell {
    su_path: String,
    staging_dir: PathBuf,
    timeout: Duration,
    root: OnceCell<bool>,
}

impl SuShell {
    pub fn new(su_path: String, staging_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            su_path,
            staging_dir,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            root: OnceCell::new(),
        }
    }

    async fn run(&self, command: &str) -> Result<ShellOutput> {
        debug!(shell = "su", command = %command, "Executing root command");
        let child = Command::new(&self.su_path)
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
            .map_err(|e| BlockerError::Shell(format!("Failed to spawn '{}': {}", self.su_path, e)))?;

        Ok(ShellOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_checked(&self, command: &str) -> Result<ShellOutput> {
        let output = self.run(command).await?;
        if !output.success() {
            return Err(BlockerError::Shell(format!(
                "'{}' exited with {}: {}",
                command,
                output.status,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn check_root(&self) -> bool {
        match self.run("id -u").await {
            Ok(output) => output.success() && output.stdout.trim() == "0",
            Err(e) => {
                warn!(error = %e, "Root check failed");
                false
            }
        }
    }

    /// Write `contents` to a private temp file that root can copy from.
    async fn stage(&self, contents: &str) -> Result<tempfile::NamedTempFile> {
        let dir = self.staging_dir.clone();
        let contents = contents.to_owned();
        tokio::task::spawn_blocking(move || stage_in(&dir, &contents))
            .await
            .map_err(|e| BlockerError::Shell(format!("Staging task failed: {e}")))?
    }
}

fn stage_in(dir: &Path, contents: &str) -> Result<tempfile::NamedTempFile> {
    std::fs::create_dir_all(dir)?;
    let mut staged = tempfile::Builder::new()
        .prefix("ifw-")
        .suffix(".xml")
        .tempfile_in(dir)?;
    staged.write_all(contents.as_bytes())?;
    staged.flush()?;
    Ok(staged)
}

/// Copy a staged file over `dest`, creating its directory first.
fn copy_command(src: &Path, dest: &Path, mode: u32) -> String {
    let src = quote_path(src);
    let to = quote_path(dest);
    let copy = format!("cat {src} > {to} && chmod {mode:o} {to}");
    match dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => format!("mkdir -p {} && {copy}", quote_path(parent)),
        None => copy,
    }
}

#[async_trait]
impl RootShell for SuShell {
    async fn is_root_available(&self) -> bool {
        *self.root.get_or_init(|| self.check_root()).await
    }

    async fn exec(&self, command: &str) -> Result<ShellOutput> {
        self.run(command).await
    }

    async fn read_file(&self, path: &Path) -> Result<Option<String>> {
        let p = quote_path(path);
        let output = self
            .run(&format!(
                "if [ -e {p} ]; then cat {p}; else exit {MISSING_FILE_STATUS}; fi"
            ))
            .await?;
        match output.status {
            0 => Ok(Some(output.stdout)),
            MISSING_FILE_STATUS => Ok(None),
            status => Err(BlockerError::Shell(format!(
                "cat {} exited with {}: {}",
                path.display(),
                status,
                output.stderr.trim()
            ))),
        }
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        let staged = self.stage(contents).await?;
        self.run_checked(&copy_command(staged.path(), path, mode)).await?;
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<bool> {
        let p = quote_path(path);
        let output = self
            .run_checked(&format!("if [ -e {p} ]; then rm -f {p} && echo removed; fi"))
            .await?;
        Ok(output.stdout.trim() == "removed")
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let p = quote_path(path);
        let output = self
            .run_checked(&format!("if [ -d {p} ]; then ls -1 {p}; fi"))
            .await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn name(&self) -> &str {
        "su"
    }
}
