//! Config and root check command handlers.

use anyhow::Result;

use blocker::shell;

use super::common::{load_config, Overrides};
use super::ConfigAction;

/// Report whether the configured shell can reach root.
pub(crate) async fn cmd_check_root(overrides: &Overrides) -> Result<()> {
    let config = load_config(overrides)?;
    let shell = shell::from_config(&config);
    if shell.is_root_available().await {
        println!("Root available ({})", shell.name());
        Ok(())
    } else {
        anyhow::bail!("Root not available ({})", shell.name())
    }
}

pub(crate) fn cmd_config(overrides: &Overrides, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", overrides.config_path().display());
        }
        ConfigAction::Show => {
            let config = load_config(overrides)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
