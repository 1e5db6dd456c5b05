//! Export and import of rule files to and from a backup folder.
//!
//! Export copies every `<package>.xml` verbatim. Import parses each backup
//! file and blocks its component filters through the engine, so the result
//! is merged into whatever rules the device already has.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::component::{is_valid_package, ComponentName};
use crate::error::{BlockerError, Result};
use crate::shell::RootShell;

use super::firewall::{BatchOutcome, BatchReport, IntentFirewall};
use super::rules::Rules;
use super::store::EXTENSION;

/// Which backup files to restore.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Only restore this package's file.
    pub package: Option<String>,
    /// Also restore rules for system apps.
    pub include_system: bool,
}

/// Result of an import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Packages whose rules were applied.
    pub imported: Vec<String>,
    /// Packages or files that were passed over (system apps, unreadable files).
    pub skipped: Vec<String>,
    pub components: BatchReport,
}

/// Copy every rule file into `dest`. Returns the exported packages.
pub async fn export_rules(firewall: &IntentFirewall, dest: &Path) -> Result<Vec<String>> {
    tokio::fs::create_dir_all(dest).await?;
    let store = firewall.store();
    let mut exported = Vec::new();
    for package in store.list_packages().await? {
        let Some(content) = store.read_raw(&package).await? else {
            continue;
        };
        let target = dest.join(format!("{}{}", package, EXTENSION));
        tokio::fs::write(&target, content).await?;
        info!(package = %package, path = %target.display(), "Exported rule file");
        exported.push(package);
    }
    Ok(exported)
}

/// Block the component filters found in the backup files under `src`.
///
/// Only `component-filter` rules are restored; each file's package is taken
/// from its first filter. Unparseable files are skipped, not fatal.
pub async fn import_rules<F>(
    firewall: &IntentFirewall,
    src: &Path,
    options: &ImportOptions,
    mut on_component: F,
) -> Result<ImportReport>
where
    F: FnMut(&ComponentName, &BatchOutcome) + Send,
{
    let files = backup_files(src).await?;
    let system = if options.include_system {
        HashSet::new()
    } else {
        system_packages(firewall.store().shell().as_ref()).await?
    };

    let mut report = ImportReport::default();
    for (stem, path) in files {
        if options.package.as_deref().is_some_and(|only| only != stem) {
            continue;
        }
        let content = tokio::fs::read_to_string(&path).await?;
        if content.trim().is_empty() {
            continue;
        }
        let rules = match Rules::from_xml(&content) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable backup file");
                report.skipped.push(stem);
                continue;
            }
        };

        let mut components = Vec::with_capacity(rules.len());
        for (kind, filter) in rules.iter() {
            match ComponentName::parse(filter) {
                Ok(component) => components.push((component, kind)),
                Err(e) => warn!(filter = %filter, error = %e, "Ignoring invalid filter"),
            }
        }
        let Some(package) = components.first().map(|(c, _)| c.package.clone()) else {
            continue;
        };
        if system.contains(&package) {
            info!(package = %package, "Skipping system app");
            report.skipped.push(package);
            continue;
        }

        let batch = firewall
            .add_all_typed(&components, &mut on_component)
            .await?;
        report.components.merge(batch);
        report.imported.push(package);
    }

    info!(
        imported = report.imported.len(),
        skipped = report.skipped.len(),
        "IFW import finished"
    );
    Ok(report)
}

/// `<package>.xml` files in `dir`, sorted by package.
async fn backup_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(EXTENSION) else {
            continue;
        };
        if is_valid_package(stem) && entry.file_type().await?.is_file() {
            files.push((stem.to_string(), entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

async fn system_packages(shell: &dyn RootShell) -> Result<HashSet<String>> {
    let output = shell.exec("pm list packages -s").await?;
    if !output.success() {
        return Err(BlockerError::Shell(format!(
            "pm list packages exited with {}: {}",
            output.status,
            output.stderr.trim()
        )));
    }
    Ok(parse_package_list(&output.stdout))
}

/// Parse `pm list packages` output (`package:<name>` per line).
pub fn parse_package_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentType;
    use crate::ifw::RuleStore;
    use crate::resolver::StaticResolver;
    use crate::shell::{DirectShell, ShellOutput};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Direct shell that answers `pm list packages -s` with a fixed list.
    struct DeviceShell {
        inner: DirectShell,
        system: &'static str,
    }

    #[async_trait]
    impl RootShell for DeviceShell {
        async fn is_root_available(&self) -> bool {
            true
        }
        async fn exec(&self, command: &str) -> Result<ShellOutput> {
            if command == "pm list packages -s" {
                return Ok(ShellOutput {
                    status: 0,
                    stdout: self.system.to_string(),
                    stderr: String::new(),
                });
            }
            self.inner.exec(command).await
        }
        async fn read_file(&self, path: &Path) -> Result<Option<String>> {
            self.inner.read_file(path).await
        }
        async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
            self.inner.write_file(path, contents, mode).await
        }
        async fn remove_file(&self, path: &Path) -> Result<bool> {
            self.inner.remove_file(path).await
        }
        async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
            self.inner.list_dir(path).await
        }
        fn name(&self) -> &str {
            "device"
        }
    }

    fn firewall(dir: &Path) -> IntentFirewall {
        let shell = Arc::new(DeviceShell {
            inner: DirectShell::new(5).with_root(true),
            system: "package:android\npackage:com.android.systemui\n",
        });
        IntentFirewall::new(
            RuleStore::new(dir.join("ifw"), shell),
            Arc::new(StaticResolver::new()),
        )
    }

    fn write_rules(dir: &Path, package: &str, entries: &[(ComponentType, &str)]) {
        let mut rules = Rules::new();
        for (kind, filter) in entries {
            rules.insert(*kind, filter).unwrap();
        }
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(format!("{package}.xml")), rules.to_xml().unwrap()).unwrap();
    }

    #[test]
    fn test_parse_package_list() {
        let set = parse_package_list("package:android\r\npackage:com.a\nnoise\n");
        assert_eq!(set.len(), 2);
        assert!(set.contains("com.a"));
    }

    #[tokio::test]
    async fn test_export_then_import_restores_rules() {
        let tmp = TempDir::new().unwrap();
        let ifw = tmp.path().join("ifw");
        write_rules(&ifw, "com.a", &[(ComponentType::Service, "com.a/com.a.Push")]);
        write_rules(
            &ifw,
            "com.b",
            &[
                (ComponentType::Activity, "com.b/com.b.Ads"),
                (ComponentType::Receiver, "com.b/com.b.Boot"),
            ],
        );

        let fw = firewall(tmp.path());
        let backup = tmp.path().join("backup");
        let exported = export_rules(&fw, &backup).await.unwrap();
        assert_eq!(exported, vec!["com.a".to_string(), "com.b".to_string()]);
        assert_eq!(
            std::fs::read_to_string(backup.join("com.b.xml")).unwrap(),
            std::fs::read_to_string(ifw.join("com.b.xml")).unwrap()
        );

        assert_eq!(fw.clear_all().await.unwrap(), 2);
        let mut count = 0;
        let report = import_rules(&fw, &backup, &ImportOptions::default(), |_, _| count += 1)
            .await
            .unwrap();
        assert_eq!(report.imported, vec!["com.a".to_string(), "com.b".to_string()]);
        assert_eq!(report.components.applied, 3);
        assert_eq!(count, 3);

        let rules = fw.rules("com.b").await.unwrap();
        assert_eq!(rules.kind_of("com.b/com.b.Boot"), Some(ComponentType::Receiver));
    }

    #[tokio::test]
    async fn test_import_single_package() {
        let tmp = TempDir::new().unwrap();
        let backup = tmp.path().join("backup");
        write_rules(&backup, "com.a", &[(ComponentType::Activity, "com.a/com.a.X")]);
        write_rules(&backup, "com.b", &[(ComponentType::Activity, "com.b/com.b.Y")]);

        let fw = firewall(tmp.path());
        let options = ImportOptions {
            package: Some("com.b".into()),
            include_system: true,
        };
        let report = import_rules(&fw, &backup, &options, |_, _| {}).await.unwrap();
        assert_eq!(report.imported, vec!["com.b".to_string()]);
        assert_eq!(fw.store().list_packages().await.unwrap(), vec!["com.b".to_string()]);
    }

    #[tokio::test]
    async fn test_import_skips_system_apps_and_bad_files() {
        let tmp = TempDir::new().unwrap();
        let backup = tmp.path().join("backup");
        write_rules(
            &backup,
            "com.android.systemui",
            &[(ComponentType::Service, "com.android.systemui/com.android.systemui.Keyguard")],
        );
        write_rules(&backup, "com.c", &[(ComponentType::Service, "com.c/com.c.S")]);
        std::fs::write(backup.join("com.bad.xml"), "<rules><service></activity></rules>").unwrap();
        std::fs::write(backup.join("com.empty.xml"), "").unwrap();

        let fw = firewall(tmp.path());
        let report = import_rules(&fw, &backup, &ImportOptions::default(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.imported, vec!["com.c".to_string()]);
        assert_eq!(
            report.skipped,
            vec!["com.android.systemui".to_string(), "com.bad".to_string()]
        );

        let everything = ImportOptions {
            package: None,
            include_system: true,
        };
        let report = import_rules(&fw, &backup, &everything, |_, _| {}).await.unwrap();
        assert!(report.imported.contains(&"com.android.systemui".to_string()));
    }

    #[tokio::test]
    async fn test_import_missing_folder_errors() {
        let tmp = TempDir::new().unwrap();
        let fw = firewall(tmp.path());
        let err = import_rules(&fw, &tmp.path().join("nope"), &ImportOptions::default(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BlockerError::Io(_)));
    }
}
