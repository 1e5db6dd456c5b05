//! Shared helpers for CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use blocker::component::{ComponentName, ComponentType};
use blocker::config::{Config, ControllerKind};
use blocker::ifw::{IntentFirewall, RuleStore};
use blocker::resolver::{self, ComponentTypeResolver, StaticResolver};
use blocker::shell::{self, RootShell};

/// Global flags that take precedence over the config file and environment.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub config_path: Option<PathBuf>,
    pub controller: Option<ControllerKind>,
    pub ifw_dir: Option<PathBuf>,
}

impl Overrides {
    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(Config::path)
    }
}

/// Load the config (file, then `BLOCKER_*`, then flags).
pub(crate) fn load_config(overrides: &Overrides) -> Result<Config> {
    let path = overrides.config_path();
    let mut config = Config::load_with_env(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(kind) = overrides.controller {
        config.controller = kind;
    }
    if let Some(dir) = &overrides.ifw_dir {
        config.ifw_dir = dir.clone();
    }
    Ok(config)
}

/// Parse `package/class` arguments, failing on the first invalid one.
pub(crate) fn parse_components(args: &[String]) -> Result<Vec<ComponentName>> {
    args.iter()
        .map(|arg| {
            ComponentName::parse(arg).with_context(|| format!("Invalid component '{}'", arg))
        })
        .collect()
}

/// Resolver for `components`: a fixed kind when `--type` was given,
/// otherwise APK manifest lookups with `dumpsys package` as fallback.
pub(crate) fn resolver_for(
    shell: Arc<dyn RootShell>,
    components: &[ComponentName],
    kind: Option<ComponentType>,
) -> Arc<dyn ComponentTypeResolver> {
    match kind {
        Some(kind) => Arc::new(StaticResolver::uniform(components, kind)),
        None => resolver::device_resolver(shell),
    }
}

/// Firewall for commands that work on rule files directly.
pub(crate) fn firewall(config: &Config) -> IntentFirewall {
    let shell = shell::from_config(config);
    let store = RuleStore::new(config.ifw_dir.clone(), shell.clone());
    IntentFirewall::new(store, resolver::device_resolver(shell))
}
