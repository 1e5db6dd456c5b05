//! Resolve component kinds from `dumpsys package <pkg>`.
//!
//! The resolver tables in the dump list every component that declares an
//! intent filter, grouped by kind; providers additionally appear under
//! `ContentProvider Authorities`. Components without filters are not listed
//! and resolve as unknown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::component::{is_valid_package, ComponentName, ComponentType};
use crate::error::{BlockerError, Result};
use crate::shell::{shell_quote, RootShell};

use super::ComponentTypeResolver;

/// Class name to kind, for one package.
pub type KindTable = HashMap<String, ComponentType>;

static COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9_.]+)/([A-Za-z0-9_.$]+)").unwrap());

/// Parses `dumpsys package` output, caching one table per package.
pub struct DumpsysResolver {
    shell: Arc<dyn RootShell>,
    tables: Mutex<HashMap<String, Arc<KindTable>>>,
}

impl DumpsysResolver {
    pub fn new(shell: Arc<dyn RootShell>) -> Self {
        Self {
            shell,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached table.
    pub fn invalidate(&self) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.clear();
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
            .exec(&format!("dumpsys package {}", shell_quote(package)))
            .await?;
        if !output.success() {
            return Err(BlockerError::Shell(format!(
                "dumpsys package {} exited with {}: {}",
                package,
                output.status,
                output.stderr.trim()
            )));
        }
        let table = Arc::new(parse_dump(package, &output.stdout));
        debug!(package = %package, components = table.len(), "Parsed dumpsys resolver tables");
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(package.to_string(), Arc::clone(&table));
        }
        Ok(table)
    }
}

#[async_trait]
impl ComponentTypeResolver for DumpsysResolver {
    async fn resolve(&self, component: &ComponentName) -> Result<ComponentType> {
        let table = self.table_for(&component.package).await?;
        table
            .get(&component.class)
            .copied()
            .ok_or_else(|| BlockerError::UnknownComponent(component.to_string()))
    }
}

fn section_kind(header: &str) -> Option<ComponentType> {
    match header.trim_end_matches(':') {
        "Activity Resolver Table" => Some(ComponentType::Activity),
        "Receiver Resolver Table" => Some(ComponentType::Receiver),
        "Service Resolver Table" => Some(ComponentType::Service),
        "Provider Resolver Table" | "ContentProvider Authorities" | "Registered ContentProviders" => {
            Some(ComponentType::Provider)
        }
        _ => None,
    }
}

/// Map class names of `package` to their kind.
pub fn parse_dump(package: &str, dump: &str) -> KindTable {
    let mut table = KindTable::new();
    let mut section: Option<ComponentType> = None;

    for line in dump.lines() {
        if line.is_empty() {
            continue;
        }
        // Section headers are the only unindented lines.
        if !line.starts_with(char::is_whitespace) {
            section = section_kind(line.trim());
            continue;
        }
        let Some(kind) = section else {
            continue;
        };
        for caps in COMPONENT_RE.captures_iter(line) {
            if &caps[1] != package {
                continue;
            }
            let name = ComponentName::new(package, &caps[2]);
            table.entry(name.class).or_insert(kind);
        }
    }
    table
}
