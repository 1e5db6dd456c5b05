//! Component controllers.
//!
//! A controller turns a component off and on. [`IfwController`] writes
//! Intent Firewall rules; [`PmController`] flips the package manager's
//! component enabled setting.

pub mod ifw;
pub mod pm;

use std::sync::Arc;

use async_trait::async_trait;

use crate::component::ComponentName;
use crate::config::{Config, ControllerKind};
use crate::error::Result;
use crate::ifw::{BatchOutcome, BatchReport, IntentFirewall, RuleStore};
use crate::resolver::ComponentTypeResolver;
use crate::shell::RootShell;

pub use ifw::IfwController;
pub use pm::PmController;

/// Per-component progress callback for batch operations.
pub type ProgressFn<'a> = dyn FnMut(&ComponentName, &BatchOutcome) + Send + 'a;

/// Disables and enables components through one mechanism.
#[async_trait]
pub trait ComponentController: Send + Sync {
    /// Short identifier ("ifw" or "pm").
    fn name(&self) -> &str;

    /// Disable `component`. Returns `true` if its state changed.
    async fn disable(&self, component: &ComponentName) -> Result<bool>;

    /// Enable `component`. Returns `true` if its state changed.
    async fn enable(&self, component: &ComponentName) -> Result<bool>;

    async fn is_enabled(&self, component: &ComponentName) -> Result<bool>;

    async fn batch_disable(
        &self,
        components: &[ComponentName],
        on_component: &mut ProgressFn<'_>,
    ) -> Result<BatchReport>;

    async fn batch_enable(
        &self,
        components: &[ComponentName],
        on_component: &mut ProgressFn<'_>,
    ) -> Result<BatchReport>;
}

/// Build the controller selected by `kind`.
pub fn build(
    kind: ControllerKind,
    config: &Config,
    shell: Arc<dyn RootShell>,
    resolver: Arc<dyn ComponentTypeResolver>,
) -> Arc<dyn ComponentController> {
    match kind {
        ControllerKind::Ifw => {
            let store = RuleStore::new(config.ifw_dir.clone(), shell);
            Arc::new(IfwController::new(Arc::new(IntentFirewall::new(
                store, resolver,
            ))))
        }
        ControllerKind::Pm => Arc::new(PmController::new(shell, config.user_id)),
    }
}
