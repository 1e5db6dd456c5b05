//! Block, unblock and status command handlers.

use anyhow::{Context, Result};
use serde::Serialize;

use blocker::component::{ComponentName, ComponentType};
use blocker::controller;
use blocker::ifw::{BatchOutcome, BatchReport};
use blocker::shell;

use super::common::{load_config, parse_components, resolver_for, Overrides};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Block,
    Unblock,
}

impl Action {
    fn done(self) -> &'static str {
        match self {
            Action::Block => "blocked",
            Action::Unblock => "unblocked",
        }
    }
}

/// Disable components.
pub(crate) async fn cmd_block(
    overrides: &Overrides,
    args: Vec<String>,
    kind: Option<ComponentType>,
) -> Result<()> {
    apply(overrides, &args, kind, Action::Block).await
}

/// Re-enable components.
pub(crate) async fn cmd_unblock(
    overrides: &Overrides,
    args: Vec<String>,
    kind: Option<ComponentType>,
) -> Result<()> {
    apply(overrides, &args, kind, Action::Unblock).await
}

async fn apply(
    overrides: &Overrides,
    args: &[String],
    kind: Option<ComponentType>,
    action: Action,
) -> Result<()> {
    let config = load_config(overrides)?;
    let components = parse_components(args)?;
    let shell = shell::from_config(&config);
    let resolver = resolver_for(shell.clone(), &components, kind);
    let controller = controller::build(config.controller, &config, shell, resolver);

    let mut print = |component: &ComponentName, outcome: &BatchOutcome| {
        println!("{}", describe(component, outcome, action));
    };
    let report = match action {
        Action::Block => controller.batch_disable(&components, &mut print).await,
        Action::Unblock => controller.batch_enable(&components, &mut print).await,
    }
    .with_context(|| format!("{} controller failed", controller.name()))?;

    println!(
        "{} {}, {} unchanged, {} skipped, {} failed",
        report.applied,
        action.done(),
        report.unchanged,
        report.skipped,
        report.failed.len()
    );
    ensure_success(&report)
}

/// Turn component failures into an error so the process exits non-zero.
pub(crate) fn ensure_success(report: &BatchReport) -> Result<()> {
    if report.has_failures() {
        anyhow::bail!(
            "{} of {} components failed",
            report.failed.len(),
            report.total()
        );
    }
    Ok(())
}

fn describe(component: &ComponentName, outcome: &BatchOutcome, action: Action) -> String {
    let status = match outcome {
        BatchOutcome::Applied => action.done().to_string(),
        BatchOutcome::Unchanged => format!("already {}", action.done()),
        BatchOutcome::SkippedProvider => "skipped (content provider)".to_string(),
        BatchOutcome::Failed(reason) => format!("failed: {}", reason),
    };
    format!("{}\t{}", component.short_form(), status)
}

#[derive(Debug, Serialize)]
struct StatusEntry {
    component: String,
    enabled: bool,
}

/// Print whether each component is enabled.
pub(crate) async fn cmd_status(overrides: &Overrides, args: Vec<String>, json: bool) -> Result<()> {
    let config = load_config(overrides)?;
    let components = parse_components(&args)?;
    let shell = shell::from_config(&config);
    let resolver = resolver_for(shell.clone(), &components, None);
    let controller = controller::build(config.controller, &config, shell, resolver);

    let mut entries = Vec::with_capacity(components.len());
    for component in &components {
        let enabled = controller
            .is_enabled(component)
            .await
            .with_context(|| format!("Failed to read state of {}", component))?;
        entries.push(StatusEntry {
            component: component.filter(),
            enabled,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            let state = if entry.enabled { "enabled" } else { "blocked" };
            println!("{}\t{}", entry.component, state);
        }
    }
    Ok(())
}
