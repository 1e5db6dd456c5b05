//! Rule file command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use blocker::ifw::{self, ImportOptions};

use super::common::{firewall, load_config, Overrides};
use super::component::ensure_success;

/// Print a package's rules as XML, or JSON with `--json`.
pub(crate) async fn cmd_rules(overrides: &Overrides, package: &str, json: bool) -> Result<()> {
    let config = load_config(overrides)?;
    let firewall = firewall(&config);
    let rules = firewall
        .rules(package)
        .await
        .with_context(|| format!("Failed to load rules for {}", package))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
    } else if rules.is_empty() {
        eprintln!("No rules for {}", package);
    } else {
        print!("{}", rules.to_xml()?);
    }
    Ok(())
}

/// List packages with a rule file.
pub(crate) async fn cmd_list(overrides: &Overrides) -> Result<()> {
    let config = load_config(overrides)?;
    let firewall = firewall(&config);
    let packages = firewall
        .store()
        .list_packages()
        .await
        .with_context(|| format!("Failed to list {}", config.ifw_dir.display()))?;
    for package in packages {
        println!("{}", package);
    }
    Ok(())
}

/// Delete a package's rule file.
pub(crate) async fn cmd_clear(overrides: &Overrides, package: &str) -> Result<()> {
    let config = load_config(overrides)?;
    let firewall = firewall(&config);
    let removed = firewall
        .clear(package)
        .await
        .with_context(|| format!("Failed to clear rules for {}", package))?;
    if removed {
        println!("Removed rules for {}", package);
    } else {
        println!("No rules for {}", package);
    }
    Ok(())
}

/// Delete every rule file.
pub(crate) async fn cmd_reset(overrides: &Overrides) -> Result<()> {
    let config = load_config(overrides)?;
    let firewall = firewall(&config);
    let removed = firewall
        .clear_all()
        .await
        .with_context(|| format!("Failed to reset {}", config.ifw_dir.display()))?;
    println!("Removed {} rule files", removed);
    Ok(())
}

/// Copy every rule file into `dir`.
pub(crate) async fn cmd_export(overrides: &Overrides, dir: &Path) -> Result<()> {
    let config = load_config(overrides)?;
    let firewall = firewall(&config);
    let exported = ifw::export_rules(&firewall, dir)
        .await
        .with_context(|| format!("Failed to export rules to {}", dir.display()))?;
    println!("Exported {} rule files to {}", exported.len(), dir.display());
    Ok(())
}

/// Block the components found in backed-up rule files.
pub(crate) async fn cmd_import(
    overrides: &Overrides,
    dir: &Path,
    package: Option<String>,
    include_system: bool,
) -> Result<()> {
    let config = load_config(overrides)?;
    let firewall = firewall(&config);
    let options = ImportOptions {
        package,
        include_system,
    };
    let report = ifw::import_rules(&firewall, dir, &options, |component, outcome| {
        tracing::debug!(component = %component, outcome = ?outcome, "Imported component");
    })
    .await
    .with_context(|| format!("Failed to import rules from {}", dir.display()))?;

    for package in &report.skipped {
        println!("{}\tskipped", package);
    }
    println!(
        "Imported {} packages: {} blocked, {} unchanged, {} failed",
        report.imported.len(),
        report.components.applied,
        report.components.unchanged,
        report.components.failed.len()
    );
    ensure_success(&report.components)
}
