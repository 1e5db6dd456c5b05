//! Controller backed by `pm enable` / `pm disable`.
//!
//! Equivalent to `PackageManager.setComponentEnabledSetting`. Unlike the
//! intent firewall this also handles content providers, and the state lives
//! in the package manager rather than in a rule file.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::component::ComponentName;
use crate::error::{BlockerError, Result};
use crate::ifw::{BatchOutcome, BatchReport};
use crate::shell::{shell_quote, RootShell};

use super::{ComponentController, ProgressFn};

pub struct PmController {
    shell: Arc<dyn RootShell>,
    user_id: u32,
}

impl PmController {
    pub fn new(shell: Arc<dyn RootShell>, user_id: u32) -> Self {
        Self { shell, user_id }
    }

    async fn ensure_root(&self) -> Result<()> {
        if self.shell.is_root_available().await {
            Ok(())
        } else {
            Err(BlockerError::RootUnavailable)
        }
    }

    async fn disabled_components(&self, package: &str) -> Result<HashSet<String>> {
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
        Ok(parse_disabled_components(&output.stdout, self.user_id))
    }

    async fn set_state(&self, component: &ComponentName, enable: bool) -> Result<bool> {
        let disabled = self.disabled_components(&component.package).await?;
        if !disabled.contains(&component.class) == enable {
            return Ok(false);
        }
        self.run_pm(component, enable).await?;
        Ok(true)
    }

    async fn run_pm(&self, component: &ComponentName, enable: bool) -> Result<()> {
        let verb = if enable { "enable" } else { "disable" };
        let output = self
            .shell
            .exec(&format!(
                "pm {} --user {} {}",
                verb,
                self.user_id,
                shell_quote(&component.filter())
            ))
            .await?;
        if !output.success() {
            return Err(BlockerError::Shell(format!(
                "pm {} {} exited with {}: {}",
                verb,
                component,
                output.status,
                output.stderr.trim()
            )));
        }
        info!(component = %component, user = self.user_id, "pm {}", verb);
        Ok(())
    }

    async fn batch(
        &self,
        components: &[ComponentName],
        enable: bool,
        on_component: &mut ProgressFn<'_>,
    ) -> Result<BatchReport> {
        self.ensure_root().await?;

        let mut by_package: BTreeMap<&str, Vec<&ComponentName>> = BTreeMap::new();
        for component in components {
            by_package
                .entry(component.package.as_str())
                .or_default()
                .push(component);
        }

        let mut report = BatchReport::default();
        for (package, members) in by_package {
            // One state lookup per package; the local set tracks our own changes.
            let mut disabled = match self.disabled_components(package).await {
                Ok(disabled) => disabled,
                Err(e) => {
                    warn!(package = %package, error = %e, "Failed to read component states");
                    let outcome = BatchOutcome::Failed(e.to_string());
                    for component in members {
                        report.record(component, &outcome);
                        on_component(component, &outcome);
                    }
                    continue;
                }
            };
            for component in members {
                let outcome = if !disabled.contains(&component.class) == enable {
                    BatchOutcome::Unchanged
                } else {
                    match self.run_pm(component, enable).await {
                        Ok(()) => {
                            if enable {
                                disabled.remove(&component.class);
                            } else {
                                disabled.insert(component.class.clone());
                            }
                            BatchOutcome::Applied
                        }
                        Err(e) => {
                            warn!(component = %component, error = %e, "pm state change failed");
                            BatchOutcome::Failed(e.to_string())
                        }
                    }
                };
                report.record(component, &outcome);
                on_component(component, &outcome);
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl ComponentController for PmController {
    fn name(&self) -> &str {
        "pm"
    }

    async fn disable(&self, component: &ComponentName) -> Result<bool> {
        self.ensure_root().await?;
        self.set_state(component, false).await
    }

    async fn enable(&self, component: &ComponentName) -> Result<bool> {
        self.ensure_root().await?;
        self.set_state(component, true).await
    }

    async fn is_enabled(&self, component: &ComponentName) -> Result<bool> {
        let disabled = self.disabled_components(&component.package).await?;
        Ok(!disabled.contains(&component.class))
    }

    async fn batch_disable(
        &self,
        components: &[ComponentName],
        on_component: &mut ProgressFn<'_>,
    ) -> Result<BatchReport> {
        self.batch(components, false, on_component).await
    }

    async fn batch_enable(
        &self,
        components: &[ComponentName],
        on_component: &mut ProgressFn<'_>,
    ) -> Result<BatchReport> {
        self.batch(components, true, on_component).await
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Class names listed under `disabledComponents:` for `user_id`.
pub fn parse_disabled_components(dump: &str, user_id: u32) -> HashSet<String> {
    let user_header = format!("User {}:", user_id);
    let mut disabled = HashSet::new();
    let mut user_indent: Option<usize> = None;
    let mut list_indent: Option<usize> = None;

    for line in dump.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let indent = indent_of(line);

        if let Some(li) = list_indent {
            if indent > li {
                disabled.insert(trimmed.to_string());
                continue;
            }
            list_indent = None;
        }

        if let Some(ui) = user_indent {
            if indent <= ui {
                user_indent = None;
            } else if trimmed == "disabledComponents:" {
                list_indent = Some(indent);
                continue;
            }
        }

        if user_indent.is_none() && trimmed.starts_with(&user_header) {
            user_indent = Some(indent);
        }
    }
    disabled
}
