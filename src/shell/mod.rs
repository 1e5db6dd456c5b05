//! Privileged command execution.
//!
//! Everything that touches root-owned state (rule files under
//! `/data/system/ifw`, `pm`, `dumpsys`) goes through a [`RootShell`].
//! [`SuShell`] escalates each command with `su -c`; [`DirectShell`] runs in
//! the current process for when it is already privileged.

pub mod direct;
pub mod su;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, ShellMode};
use crate::error::Result;

pub use direct::DirectShell;
pub use su::SuShell;

/// Captured result of a shell command.
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Root-capable shell used for rule file I/O and package manager calls.
#[async_trait]
pub trait RootShell: Send + Sync {
    /// Whether privileged operations can run right now.
    async fn is_root_available(&self) -> bool;

    /// Run `command` through `sh -c` with root privileges.
    async fn exec(&self, command: &str) -> Result<ShellOutput>;

    /// Read a file, returning `None` if it does not exist.
    async fn read_file(&self, path: &Path) -> Result<Option<String>>;

    /// Replace the contents of `path` and set its permission bits.
    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    /// Delete a file. Returns `false` if it did not exist.
    async fn remove_file(&self, path: &Path) -> Result<bool>;

    /// File names in a directory. A missing directory lists as empty.
    async fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Short identifier for logs ("su" or "direct").
    fn name(&self) -> &str;
}

/// Build the shell selected by the configuration.
pub fn from_config(config: &Config) -> Arc<dyn RootShell> {
    match config.shell.mode {
        ShellMode::Su => Arc::new(SuShell::new(
            config.shell.su_path.clone(),
            config.cache_dir.clone(),
            config.shell.timeout_secs,
        )),
        ShellMode::Direct => Arc::new(DirectShell::new(config.shell.timeout_secs)),
    }
}

/// Quote `arg` for POSIX `sh` using single quotes.
pub fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

pub(crate) fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("/data/system/ifw"), "'/data/system/ifw'");
    }

    #[test]
    fn test_shell_quote_embedded_quote() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_shell_quote_metacharacters_stay_literal() {
        assert_eq!(shell_quote("a; rm -rf /"), "'a; rm -rf /'");
        assert_eq!(shell_quote("$(id)"), "'$(id)'");
    }

    #[test]
    fn test_shell_output_success() {
        let ok = ShellOutput::default();
        assert!(ok.success());
        let failed = ShellOutput {
            status: 1,
            ..Default::default()
        };
        assert!(!failed.success());
    }
}
