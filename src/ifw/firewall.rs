//! Intent Firewall rule engine.
//!
//! Keeps one [`Rules`] per package in memory, loaded lazily from the rule
//! directory on first access. Every mutation is applied to a copy of the
//! cached rules and committed to the cache only after the file write
//! succeeds, so a failed save never leaves the cache ahead of the disk.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::component::{ComponentName, ComponentType};
use crate::error::{BlockerError, Result};
use crate::resolver::ComponentTypeResolver;

use super::rules::Rules;
use super::store::RuleStore;

/// Per-component result of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// The rule set changed for this component.
    Applied,
    /// The component was already in the requested state.
    Unchanged,
    /// Content providers cannot be handled by the intent firewall.
    SkippedProvider,
    /// Resolution or persistence failed; the batch continued.
    Failed(String),
}

/// Totals for a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: Vec<(ComponentName, String)>,
}

impl BatchReport {
    pub fn record(&mut self, component: &ComponentName, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Applied => self.applied += 1,
            BatchOutcome::Unchanged => self.unchanged += 1,
            BatchOutcome::SkippedProvider => self.skipped += 1,
            BatchOutcome::Failed(reason) => self.failed.push((component.clone(), reason.clone())),
        }
    }

    /// Fold another report's totals into this one.
    pub fn merge(&mut self, other: BatchReport) {
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.applied + self.unchanged + self.skipped + self.failed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchMode {
    Add,
    Remove,
}

/// Rule engine over a [`RuleStore`] and a component type resolver.
pub struct IntentFirewall {
    store: RuleStore,
    resolver: Arc<dyn ComponentTypeResolver>,
    cache: Mutex<HashMap<String, Rules>>,
}

impl IntentFirewall {
    pub fn new(store: RuleStore, resolver: Arc<dyn ComponentTypeResolver>) -> Self {
        Self {
            store,
            resolver,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    async fn ensure_root(&self) -> Result<()> {
        if self.store.shell().is_root_available().await {
            Ok(())
        } else {
            Err(BlockerError::RootUnavailable)
        }
    }

    /// Cached rules for `package`, loading them on first access.
    async fn cached<'a>(
        &self,
        cache: &'a mut HashMap<String, Rules>,
        package: &str,
    ) -> Result<&'a Rules> {
        match cache.entry(package.to_string()) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let rules = self.store.load(package).await?;
                Ok(&*entry.insert(rules))
            }
        }
    }

    async fn resolve_ifw_kind(&self, component: &ComponentName) -> Result<ComponentType> {
        let kind = self.resolver.resolve(component).await?;
        if kind == ComponentType::Provider {
            return Err(BlockerError::UnsupportedComponent(format!(
                "{} is a content provider; the intent firewall cannot block providers",
                component
            )));
        }
        Ok(kind)
    }

    /// Block `component`. Returns `true` if the rule set changed.
    pub async fn add(&self, component: &ComponentName) -> Result<bool> {
        self.ensure_root().await?;
        let kind = self.resolve_ifw_kind(component).await?;

        let mut cache = self.cache.lock().await;
        let mut rules = self.cached(&mut cache, &component.package).await?.clone();
        let changed = rules.insert(kind, &component.filter())?;
        if changed {
            self.store.save(&component.package, &rules).await?;
            cache.insert(component.package.clone(), rules);
            info!(component = %component, kind = %kind, "Added IFW rule");
        } else {
            debug!(component = %component, "IFW rule already present");
        }
        Ok(changed)
    }

    /// Unblock `component`. Returns `true` if a rule was removed.
    pub async fn remove(&self, component: &ComponentName) -> Result<bool> {
        self.ensure_root().await?;

        let mut cache = self.cache.lock().await;
        let mut rules = self.cached(&mut cache, &component.package).await?.clone();
        let changed = rules.remove(&component.filter());
        if changed {
            self.store.save(&component.package, &rules).await?;
            cache.insert(component.package.clone(), rules);
            info!(component = %component, "Removed IFW rule");
        }
        Ok(changed)
    }

    /// Block every component, grouped by package.
    ///
    /// Providers are skipped and resolver failures are reported through
    /// `on_component` without aborting the batch. Each package is saved once.
    pub async fn add_all<F>(&self, components: &[ComponentName], on_component: F) -> Result<BatchReport>
    where
        F: FnMut(&ComponentName, &BatchOutcome) + Send,
    {
        let items = components.iter().map(|c| (c, None)).collect();
        self.apply_batch(items, BatchMode::Add, on_component).await
    }

    /// Like [`add_all`](Self::add_all) for components whose kind is already
    /// known, such as filters read back from a rule file. The resolver is not
    /// consulted.
    pub async fn add_all_typed<F>(
        &self,
        components: &[(ComponentName, ComponentType)],
        on_component: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ComponentName, &BatchOutcome) + Send,
    {
        let items = components.iter().map(|(c, kind)| (c, Some(*kind))).collect();
        self.apply_batch(items, BatchMode::Add, on_component).await
    }

    /// Unblock every component, grouped by package.
    ///
    /// Providers are skipped like in [`add_all`](Self::add_all). A component
    /// the resolver cannot classify is still removed by its filter.
    pub async fn remove_all<F>(
        &self,
        components: &[ComponentName],
        on_component: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ComponentName, &BatchOutcome) + Send,
    {
        let items = components.iter().map(|c| (c, None)).collect();
        self.apply_batch(items, BatchMode::Remove, on_component).await
    }

    async fn apply_batch<F>(
        &self,
        items: Vec<(&ComponentName, Option<ComponentType>)>,
        mode: BatchMode,
        mut on_component: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ComponentName, &BatchOutcome) + Send,
    {
        self.ensure_root().await?;

        let mut by_package: BTreeMap<&str, Vec<(&ComponentName, Option<ComponentType>)>> =
            BTreeMap::new();
        for (component, kind) in items {
            by_package
                .entry(component.package.as_str())
                .or_default()
                .push((component, kind));
        }

        let mut report = BatchReport::default();
        for (package, entries) in by_package {
            let mut members = Vec::with_capacity(entries.len());
            let mut kinds = Vec::with_capacity(entries.len());
            for (component, known) in entries {
                let kind = match known {
                    Some(kind) => Ok(kind),
                    None => self.resolver.resolve(component).await,
                };
                members.push(component);
                kinds.push(kind);
            }

            let outcomes = self.apply_package(package, &members, kinds, mode).await;
            for (component, outcome) in members.iter().zip(outcomes.iter()) {
                report.record(*component, outcome);
                on_component(*component, outcome);
            }
        }

        info!(
            applied = report.applied,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed.len(),
            "IFW batch finished"
        );
        Ok(report)
    }

    /// Apply one package's share of a batch and save it once.
    async fn apply_package(
        &self,
        package: &str,
        members: &[&ComponentName],
        kinds: Vec<Result<ComponentType>>,
        mode: BatchMode,
    ) -> Vec<BatchOutcome> {
        let mut cache = self.cache.lock().await;
        let mut rules = match self.cached(&mut cache, package).await {
            Ok(rules) => rules.clone(),
            Err(e) => {
                warn!(package = %package, error = %e, "Failed to load rules for batch");
                return members
                    .iter()
                    .map(|_| BatchOutcome::Failed(e.to_string()))
                    .collect();
            }
        };

        let mut outcomes = Vec::with_capacity(members.len());
        for (component, kind) in members.iter().zip(kinds) {
            let filter = component.filter();
            let changed = match (kind, mode) {
                (Ok(ComponentType::Provider), _) => {
                    outcomes.push(BatchOutcome::SkippedProvider);
                    continue;
                }
                (Ok(kind), BatchMode::Add) => rules.insert(kind, &filter),
                (Ok(_), BatchMode::Remove) => Ok(rules.remove(&filter)),
                (Err(e), BatchMode::Remove) => {
                    debug!(component = %component, error = %e, "Type unknown, removing by filter");
                    Ok(rules.remove(&filter))
                }
                (Err(e), BatchMode::Add) => {
                    warn!(component = %component, error = %e, "Cannot resolve component type, skipping");
                    Err(e)
                }
            };
            outcomes.push(match changed {
                Ok(true) => BatchOutcome::Applied,
                Ok(false) => BatchOutcome::Unchanged,
                Err(e) => BatchOutcome::Failed(e.to_string()),
            });
        }

        if !outcomes.contains(&BatchOutcome::Applied) {
            return outcomes;
        }
        match self.store.save(package, &rules).await {
            Ok(()) => {
                cache.insert(package.to_string(), rules);
            }
            Err(e) => {
                warn!(package = %package, error = %e, "Failed to save rules for batch");
                let reason = e.to_string();
                for outcome in outcomes.iter_mut() {
                    if *outcome == BatchOutcome::Applied {
                        *outcome = BatchOutcome::Failed(reason.clone());
                    }
                }
            }
        }
        outcomes
    }

    /// `false` iff a rule blocks `component`.
    pub async fn get_component_enable_state(&self, component: &ComponentName) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        let rules = self.cached(&mut cache, &component.package).await?;
        Ok(!rules.contains(&component.filter()))
    }

    /// Snapshot of the rules for `package`.
    pub async fn rules(&self, package: &str) -> Result<Rules> {
        let mut cache = self.cache.lock().await;
        Ok(self.cached(&mut cache, package).await?.clone())
    }

    /// Persist `rules` for `package`, replacing the cached copy.
    pub async fn save(&self, package: &str, rules: Rules) -> Result<()> {
        self.ensure_root().await?;
        let mut cache = self.cache.lock().await;
        self.store.save(package, &rules).await?;
        cache.insert(package.to_string(), rules);
        Ok(())
    }

    /// Delete the rule file for `package`. Returns `false` if none existed.
    pub async fn clear(&self, package: &str) -> Result<bool> {
        self.ensure_root().await?;
        let mut cache = self.cache.lock().await;
        let removed = self.store.delete(package).await?;
        cache.remove(package);
        Ok(removed)
    }

    /// Delete every rule file in the rule directory. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        self.ensure_root().await?;
        let mut cache = self.cache.lock().await;
        cache.clear();
        let mut removed = 0;
        for package in self.store.list_packages().await? {
            if self.store.delete(&package).await? {
                removed += 1;
            }
        }
        info!(removed, "Cleared all IFW rule files");
        Ok(removed)
    }

    /// Forget every cached rule set; the next access reloads from disk.
    pub async fn reset_cache(&self) {
        let mut cache = self.cache.lock().await;
        debug!(entries = cache.len(), "Resetting IFW rule cache");
        cache.clear();
    }
}
