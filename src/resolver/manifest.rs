//! Resolve component kinds from the package's installed APKs.
//!
//! `pm path` lists the base and split APKs; each one's compiled
//! `AndroidManifest.xml` declares every activity, receiver, service and
//! provider, with or without intent filters.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::component::{is_valid_package, ComponentName, ComponentType};
use crate::error::{BlockerError, Result};
use crate::shell::{shell_quote, RootShell};

use super::axml;
use super::dumpsys::KindTable;
use super::ComponentTypeResolver;

const ANDROID_MANIFEST: &str = "AndroidManifest.xml";

/// Reads manifests out of installed APKs, caching one table per package.
pub struct ManifestResolver {
    shell: Arc<dyn RootShell>,
    tables: Mutex<HashMap<String, Arc<KindTable>>>,
}

impl ManifestResolver {
    pub fn new(shell: Arc<dyn RootShell>) -> Self {
        Self {
            shell,
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, package: &str) -> Option<Arc<KindTable>> {
        self.tables.lock().ok()?.get(package).cloned()
    }

    async fn table_for(&self, package: &str) -> Result<Arc<KindTable>> {
        if let Some(table) = self.cached(package) {
            return Ok(table);
        }
        if !is_valid_package(package) {
            return Err(BlockerError::InvalidComponent(format!(
                "invalid package name '{}'",
                package
            )));
        }
        let output = self
            .shell
            .exec(&format!("pm path {}", shell_quote(package)))
            .await?;
        if !output.success() {
            return Err(BlockerError::Shell(format!(
                "pm path {} exited with {}: {}",
                package,
                output.status,
                output.stderr.trim()
            )));
        }
        let apks = parse_pm_path(&output.stdout);
        if apks.is_empty() {
            return Err(BlockerError::Apk(format!("no APK installed for {}", package)));
        }

        let table = tokio::task::spawn_blocking(move || read_components(&apks))
            .await
            .map_err(|e| BlockerError::Apk(format!("manifest task failed: {e}")))??;
        let table = Arc::new(table);
        debug!(package = %package, components = table.len(), "Read components from APK manifests");
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(package.to_string(), Arc::clone(&table));
        }
        Ok(table)
    }
}

#[async_trait]
impl ComponentTypeResolver for ManifestResolver {
    async fn resolve(&self, component: &ComponentName) -> Result<ComponentType> {
        let table = self.table_for(&component.package).await?;
        table
            .get(&component.class)
            .copied()
            .ok_or_else(|| BlockerError::UnknownComponent(component.to_string()))
    }
}

/// APK paths from `pm path` output (`package:<path>` per line).
pub fn parse_pm_path(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Merge the components declared by every APK in `apks`.
pub fn read_components(apks: &[PathBuf]) -> Result<KindTable> {
    let mut table = KindTable::new();
    for apk in apks {
        let manifest = read_manifest(apk)?;
        for (class, kind) in axml::parse_manifest(&manifest)?.components {
            table.entry(class).or_insert(kind);
        }
    }
    Ok(table)
}

fn read_manifest(apk: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(apk)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entry = archive.by_name(ANDROID_MANIFEST)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::axml::fixture::sample_manifest;
    use crate::shell::ShellOutput;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn build_apk(path: &Path, manifest: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let mut archive = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        archive.start_file(ANDROID_MANIFEST, options).unwrap();
        archive.write_all(manifest).unwrap();
        archive.finish().unwrap();
    }

    /// Answers `pm path` with a fixed listing.
    struct PmPathShell {
        listing: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RootShell for PmPathShell {
        async fn is_root_available(&self) -> bool {
            true
        }
        async fn exec(&self, command: &str) -> Result<ShellOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(command, "pm path 'com.example'");
            Ok(ShellOutput {
                status: 0,
                stdout: self.listing.clone(),
                stderr: String::new(),
            })
        }
        async fn read_file(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        async fn write_file(&self, _path: &Path, _contents: &str, _mode: u32) -> Result<()> {
            Ok(())
        }
        async fn remove_file(&self, _path: &Path) -> Result<bool> {
            Ok(false)
        }
        async fn list_dir(&self, _path: &Path) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn name(&self) -> &str {
            "pm-path"
        }
    }

    #[test]
    fn test_parse_pm_path_with_splits() {
        let paths = parse_pm_path(
            "package:/data/app/~~x==/com.example-1/base.apk\n\
             package:/data/app/~~x==/com.example-1/split_config.arm64_v8a.apk\n",
        );
        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("split_config.arm64_v8a.apk"));
        assert!(parse_pm_path("").is_empty());
    }

    #[tokio::test]
    async fn test_resolves_components_without_intent_filters() {
        let tmp = TempDir::new().unwrap();
        let apk = tmp.path().join("base.apk");
        build_apk(&apk, &sample_manifest(false));
        let shell = Arc::new(PmPathShell {
            listing: format!("package:{}\n", apk.display()),
            calls: AtomicUsize::new(0),
        });
        let resolver = ManifestResolver::new(shell.clone());

        let boot = ComponentName::parse("com.example/.BootReceiver").unwrap();
        let files = ComponentName::new("com.example", "androidx.core.FileProvider");
        assert_eq!(resolver.resolve(&boot).await.unwrap(), ComponentType::Receiver);
        assert_eq!(resolver.resolve(&files).await.unwrap(), ComponentType::Provider);
        assert_eq!(shell.calls.load(Ordering::SeqCst), 1);

        let missing = ComponentName::parse("com.example/.Missing").unwrap();
        assert!(matches!(
            resolver.resolve(&missing).await,
            Err(BlockerError::UnknownComponent(_))
        ));
    }

    #[tokio::test]
    async fn test_apk_without_manifest_errors() {
        let tmp = TempDir::new().unwrap();
        let apk = tmp.path().join("base.apk");
        {
            let file = std::fs::File::create(&apk).unwrap();
            let mut archive = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            archive.start_file("classes.dex", options).unwrap();
            archive.write_all(b"dex\n035\0").unwrap();
            archive.finish().unwrap();
        }
        let shell = Arc::new(PmPathShell {
            listing: format!("package:{}\n", apk.display()),
            calls: AtomicUsize::new(0),
        });
        let resolver = ManifestResolver::new(shell);
        let main = ComponentName::parse("com.example/.MainActivity").unwrap();
        assert!(matches!(
            resolver.resolve(&main).await,
            Err(BlockerError::Apk(_))
        ));
    }

    #[tokio::test]
    async fn test_uninstalled_package_errors() {
        let shell = Arc::new(PmPathShell {
            listing: String::new(),
            calls: AtomicUsize::new(0),
        });
        let resolver = ManifestResolver::new(shell);
        let main = ComponentName::parse("com.example/.MainActivity").unwrap();
        assert!(matches!(
            resolver.resolve(&main).await,
            Err(BlockerError::Apk(_))
        ));
    }
}
