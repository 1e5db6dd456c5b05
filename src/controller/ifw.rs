//! Controller backed by the Intent Firewall rule engine.

use std::sync::Arc;

use async_trait::async_trait;

use crate::component::ComponentName;
use crate::error::Result;
use crate::ifw::{BatchReport, IntentFirewall};

use super::{ComponentController, ProgressFn};

/// Disabling a component adds an IFW rule; enabling removes it.
pub struct IfwController {
    firewall: Arc<IntentFirewall>,
}

impl IfwController {
    pub fn new(firewall: Arc<IntentFirewall>) -> Self {
        Self { firewall }
    }

    pub fn firewall(&self) -> &Arc<IntentFirewall> {
        &self.firewall
    }
}

#[async_trait]
impl ComponentController for IfwController {
    fn name(&self) -> &str {
        "ifw"
    }

    async fn disable(&self, component: &ComponentName) -> Result<bool> {
        self.firewall.add(component).await
    }

    async fn enable(&self, component: &ComponentName) -> Result<bool> {
        self.firewall.remove(component).await
    }

    async fn is_enabled(&self, component: &ComponentName) -> Result<bool> {
        self.firewall.get_component_enable_state(component).await
    }

    async fn batch_disable(
        &self,
        components: &[ComponentName],
        on_component: &mut ProgressFn<'_>,
    ) -> Result<BatchReport> {
        self.firewall
            .add_all(components, |c, outcome| on_component(c, outcome))
            .await
    }

    async fn batch_enable(
        &self,
        components: &[ComponentName],
        on_component: &mut ProgressFn<'_>,
    ) -> Result<BatchReport> {
        self.firewall
            .remove_all(components, |c, outcome| on_component(c, outcome))
            .await
    }
}
