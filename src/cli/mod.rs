//! Command-line interface.

mod common;
mod component;
mod config;
mod rules;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use blocker::component::ComponentType;
use blocker::config::ControllerKind;
use blocker::logging::{self, LogFormat};

/// Disable Android app components with Intent Firewall rules or the package manager.
#[derive(Parser, Debug)]
#[command(name = "blocker", version, about)]
pub(crate) struct Cli {
    /// Config file (default: ~/.blocker/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Controller to use, overriding the config (ifw, pm)
    #[arg(long, global = true, value_parser = parse_controller)]
    pub controller: Option<ControllerKind>,

    /// Intent Firewall rule directory, overriding the config
    #[arg(long, global = true)]
    pub ifw_dir: Option<PathBuf>,

    /// Log format on stderr (text, json)
    #[arg(long, global = true, env = "BLOCKER_LOG_FORMAT", default_value = "text", value_parser = parse_log_format)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Disable components (package/class, short form package/.Class accepted)
    Block {
        #[arg(required = true)]
        components: Vec<String>,
        /// Component kind, skipping manifest lookup
        #[arg(long = "type", value_parser = parse_component_type)]
        kind: Option<ComponentType>,
    },
    /// Re-enable components
    Unblock {
        #[arg(required = true)]
        components: Vec<String>,
        /// Component kind, skipping manifest lookup
        #[arg(long = "type", value_parser = parse_component_type)]
        kind: Option<ComponentType>,
    },
    /// Show whether components are enabled
    Status {
        #[arg(required = true)]
        components: Vec<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a package's Intent Firewall rules
    Rules {
        package: String,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// List packages that have an Intent Firewall rule file
    List,
    /// Delete a package's Intent Firewall rule file
    Clear { package: String },
    /// Delete every Intent Firewall rule file
    Reset,
    /// Copy every rule file into a folder
    Export { dir: PathBuf },
    /// Block the components listed in backed-up rule files
    Import {
        dir: PathBuf,
        /// Only restore this package
        #[arg(long)]
        package: Option<String>,
        /// Also restore rules for system apps
        #[arg(long)]
        include_system: bool,
    },
    /// Report whether root is available
    CheckRoot,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Print the config file path
    Path,
    /// Print the effective configuration as JSON
    Show,
}

fn parse_controller(s: &str) -> std::result::Result<ControllerKind, String> {
    s.parse().map_err(|e: blocker::BlockerError| e.to_string())
}

fn parse_log_format(s: &str) -> std::result::Result<LogFormat, String> {
    s.parse().map_err(|e: blocker::BlockerError| e.to_string())
}

fn parse_component_type(s: &str) -> std::result::Result<ComponentType, String> {
    s.parse().map_err(|e: blocker::BlockerError| e.to_string())
}

/// Parse arguments, set up logging and dispatch.
pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let overrides = common::Overrides {
        config_path: cli.config,
        controller: cli.controller,
        ifw_dir: cli.ifw_dir,
    };

    match cli.command {
        Commands::Block { components, kind } => {
            component::cmd_block(&overrides, components, kind).await
        }
        Commands::Unblock { components, kind } => {
            component::cmd_unblock(&overrides, components, kind).await
        }
        Commands::Status { components, json } => {
            component::cmd_status(&overrides, components, json).await
        }
        Commands::Rules { package, json } => rules::cmd_rules(&overrides, &package, json).await,
        Commands::List => rules::cmd_list(&overrides).await,
        Commands::Clear { package } => rules::cmd_clear(&overrides, &package).await,
        Commands::Reset => rules::cmd_reset(&overrides).await,
        Commands::Export { dir } => rules::cmd_export(&overrides, &dir).await,
        Commands::Import {
            dir,
            package,
            include_system,
        } => rules::cmd_import(&overrides, &dir, package, include_system).await,
        Commands::CheckRoot => config::cmd_check_root(&overrides).await,
        Commands::Config { action } => config::cmd_config(&overrides, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_block_with_type() {
        let cli = Cli::try_parse_from([
            "blocker",
            "--controller",
            "pm",
            "block",
            "com.a/.Main",
            "com.a/.Other",
            "--type",
            "broadcast",
        ])
        .unwrap();
        assert_eq!(cli.controller, Some(ControllerKind::Pm));
        match cli.command {
            Commands::Block { components, kind } => {
                assert_eq!(components.len(), 2);
                assert_eq!(kind, Some(ComponentType::Receiver));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_block_requires_components() {
        assert!(Cli::try_parse_from(["blocker", "block"]).is_err());
    }

    #[test]
    fn test_parse_import_flags() {
        let cli = Cli::try_parse_from([
            "blocker",
            "import",
            "/sdcard/ifw",
            "--package",
            "com.a",
            "--include-system",
        ])
        .unwrap();
        match cli.command {
            Commands::Import {
                dir,
                package,
                include_system,
            } => {
                assert_eq!(dir, PathBuf::from("/sdcard/ifw"));
                assert_eq!(package.as_deref(), Some("com.a"));
                assert!(include_system);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(matches!(
            Cli::try_parse_from(["blocker", "reset"]).unwrap().command,
            Commands::Reset
        ));
        assert!(Cli::try_parse_from(["blocker", "export"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_controller() {
        assert!(Cli::try_parse_from(["blocker", "--controller", "shizuku", "list"]).is_err());
    }
}
