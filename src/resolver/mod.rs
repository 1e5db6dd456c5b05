//! Component type resolution.
//!
//! The Intent Firewall files components by kind, so every add needs to know
//! whether a class is an activity, receiver, service or provider.
//! On a device the installed APK's manifest is authoritative; `dumpsys`
//! covers packages whose APKs cannot be read.

pub mod axml;
pub mod dumpsys;
pub mod manifest;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::component::{ComponentName, ComponentType};
use crate::error::{BlockerError, Result};
use crate::shell::RootShell;

pub use dumpsys::DumpsysResolver;
pub use manifest::ManifestResolver;

/// Looks up the manifest kind of a component.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComponentTypeResolver: Send + Sync {
    async fn resolve(&self, component: &ComponentName) -> Result<ComponentType>;
}

/// Resolver backed by an explicit table.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    types: HashMap<ComponentName, ComponentType>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: ComponentName, kind: ComponentType) -> Self {
        self.types.insert(component, kind);
        self
    }

    /// Map every component in `components` to the same kind.
    pub fn uniform<'a>(
        components: impl IntoIterator<Item = &'a ComponentName>,
        kind: ComponentType,
    ) -> Self {
        Self {
            types: components.into_iter().map(|c| (c.clone(), kind)).collect(),
        }
    }
}

#[async_trait]
impl ComponentTypeResolver for StaticResolver {
    async fn resolve(&self, component: &ComponentName) -> Result<ComponentType> {
        self.types
            .get(component)
            .copied()
            .ok_or_else(|| BlockerError::UnknownComponent(component.to_string()))
    }
}

/// Tries `primary`, then `fallback` when the primary lookup fails.
pub struct FallbackResolver {
    primary: Arc<dyn ComponentTypeResolver>,
    fallback: Arc<dyn ComponentTypeResolver>,
}

impl FallbackResolver {
    pub fn new(
        primary: Arc<dyn ComponentTypeResolver>,
        fallback: Arc<dyn ComponentTypeResolver>,
    ) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ComponentTypeResolver for FallbackResolver {
    async fn resolve(&self, component: &ComponentName) -> Result<ComponentType> {
        match self.primary.resolve(component).await {
            Ok(kind) => Ok(kind),
            Err(e) => {
                debug!(component = %component, error = %e, "Primary resolver failed, falling back");
                self.fallback.resolve(component).await
            }
        }
    }
}

/// APK manifests first, then `dumpsys package`.
pub fn device_resolver(shell: Arc<dyn RootShell>) -> Arc<dyn ComponentTypeResolver> {
    Arc::new(FallbackResolver::new(
        Arc::new(ManifestResolver::new(shell.clone())),
        Arc::new(DumpsysResolver::new(shell)),
    ))
}
