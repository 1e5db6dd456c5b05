//! Rule file persistence under the Intent Firewall directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::component::is_valid_package;
use crate::error::{BlockerError, Result};
use crate::shell::RootShell;

use super::rules::Rules;

pub(crate) const EXTENSION: &str = ".xml";

/// Rule files must stay world-readable for system_server.
const RULE_FILE_MODE: u32 = 0o644;

/// Reads and writes `<dir>/<package>.xml` through the root shell.
pub struct RuleStore {
    dir: PathBuf,
    shell: Arc<dyn RootShell>,
}

impl RuleStore {
    pub fn new(dir: PathBuf, shell: Arc<dyn RootShell>) -> Self {
        Self { dir, shell }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shell(&self) -> &Arc<dyn RootShell> {
        &self.shell
    }

    /// Rule file path for `package`.
    pub fn path_for(&self, package: &str) -> Result<PathBuf> {
        if !is_valid_package(package) {
            return Err(BlockerError::InvalidComponent(format!(
                "invalid package name '{}'",
                package
            )));
        }
        Ok(self.dir.join(format!("{}{}", package, EXTENSION)))
    }

    /// Raw file contents for `package`, or `None` if it has no rule file.
    pub async fn read_raw(&self, package: &str) -> Result<Option<String>> {
        let path = self.path_for(package)?;
        self.shell.read_file(&path).await
    }

    /// Load the rules for `package`.
    ///
    /// A missing file is an empty rule set. A file that does not parse is
    /// logged and also treated as empty; it is left on disk until the next save.
    pub async fn load(&self, package: &str) -> Result<Rules> {
        let path = self.path_for(package)?;
        let Some(content) = self.shell.read_file(&path).await? else {
            debug!(package = %package, "No rule file, starting empty");
            return Ok(Rules::new());
        };
        if content.trim().is_empty() {
            return Ok(Rules::new());
        }
        match Rules::from_xml(&content) {
            Ok(rules) => {
                debug!(package = %package, filters = rules.len(), "Loaded rule file");
                Ok(rules)
            }
            Err(e) => {
                warn!(
                    package = %package,
                    path = %path.display(),
                    error = %e,
                    "Rule file is malformed, starting empty"
                );
                Ok(Rules::new())
            }
        }
    }

    /// Persist `rules`. An empty rule set deletes the file instead.
    pub async fn save(&self, package: &str, rules: &Rules) -> Result<()> {
        if rules.is_empty() {
            self.delete(package).await?;
            return Ok(());
        }
        let path = self.path_for(package)?;
        let xml = rules.to_xml()?;
        self.shell.write_file(&path, &xml, RULE_FILE_MODE).await?;
        info!(package = %package, filters = rules.len(), "Saved rule file");
        Ok(())
    }

    /// Delete the rule file for `package`. Returns `false` if there was none.
    pub async fn delete(&self, package: &str) -> Result<bool> {
        let path = self.path_for(package)?;
        if !self.dir.to_string_lossy().contains("ifw") {
            return Err(BlockerError::DeleteRefused(format!(
                "{}: rule directory {} is not an ifw directory",
                path.display(),
                self.dir.display()
            )));
        }
        let removed = self.shell.remove_file(&path).await?;
        if removed {
            info!(package = %package, "Deleted rule file");
        }
        Ok(removed)
    }

    /// Packages that currently have a rule file, sorted.
    pub async fn list_packages(&self) -> Result<Vec<String>> {
        let mut packages: Vec<String> = self
            .shell
            .list_dir(&self.dir)
            .await?
            .into_iter()
            .filter_map(|name| name.strip_suffix(EXTENSION).map(str::to_string))
            .filter(|pkg| is_valid_package(pkg))
            .collect();
        packages.sort();
        Ok(packages)
    }
}
