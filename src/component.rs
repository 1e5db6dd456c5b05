//! Android component identifiers.
//!
//! A component is addressed by its flattened name `package/class`, the same
//! form used by `pm disable`, `am start -n` and Intent Firewall filters. The
//! short form `package/.Class` is expanded on parse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BlockerError, Result};

/// Kind of a manifest-declared component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Activity,
    Receiver,
    Service,
    Provider,
}

impl ComponentType {
    /// Kinds that an Intent Firewall rule file can hold, in file order.
    pub const IFW_KINDS: [ComponentType; 3] = [
        ComponentType::Activity,
        ComponentType::Receiver,
        ComponentType::Service,
    ];

    /// Element name for this kind inside an IFW `<rules>` document.
    ///
    /// Providers have no IFW representation.
    pub fn ifw_tag(self) -> Option<&'static str> {
        match self {
            ComponentType::Activity => Some("activity"),
            ComponentType::Receiver => Some("broadcast"),
            ComponentType::Service => Some("service"),
            ComponentType::Provider => None,
        }
    }

    /// Inverse of [`ComponentType::ifw_tag`].
    pub fn from_ifw_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"activity" => Some(ComponentType::Activity),
            b"broadcast" => Some(ComponentType::Receiver),
            b"service" => Some(ComponentType::Service),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::Activity => "activity",
            ComponentType::Receiver => "receiver",
            ComponentType::Service => "service",
            ComponentType::Provider => "provider",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = BlockerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "activity" => Ok(ComponentType::Activity),
            "receiver" | "broadcast" => Ok(ComponentType::Receiver),
            "service" => Ok(ComponentType::Service),
            "provider" => Ok(ComponentType::Provider),
            other => Err(BlockerError::InvalidComponent(format!(
                "unknown component type '{}'. Use: activity, receiver, service, provider",
                other
            ))),
        }
    }
}

/// Fully qualified component name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    /// Build a component name, expanding a leading-dot class against the package.
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        let package = package.into();
        let class = class.into();
        let class = if class.starts_with('.') {
            format!("{}{}", package, class)
        } else {
            class
        };
        Self { package, class }
    }

    /// Parse the flattened `package/class` form.
    pub fn parse(flat: &str) -> Result<Self> {
        let flat = flat.trim();
        let (package, class) = flat
            .split_once('/')
            .ok_or_else(|| BlockerError::InvalidComponent(format!("'{}' has no '/'", flat)))?;
        if class.contains('/') {
            return Err(BlockerError::InvalidComponent(format!(
                "'{}' has more than one '/'",
                flat
            )));
        }
        if !is_valid_package(package) {
            return Err(BlockerError::InvalidComponent(format!(
                "invalid package name '{}': must match [a-zA-Z0-9_.]+",
                package
            )));
        }
        if class.is_empty() || class == "." {
            return Err(BlockerError::InvalidComponent(format!(
                "'{}' has an empty class name",
                flat
            )));
        }
        Ok(Self::new(package, class))
    }

    /// The Intent Firewall filter string for this component.
    pub fn filter(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }

    /// Short form used by `dumpsys` (`package/.Class` when the class lives in the package).
    pub fn short_form(&self) -> String {
        match self.class.strip_prefix(self.package.as_str()) {
            Some(rest) if rest.starts_with('.') => format!("{}/{}", self.package, rest),
            _ => self.filter(),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

impl FromStr for ComponentName {
    type Err = BlockerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Package names are restricted to the characters Android allows.
pub fn is_valid_package(package: &str) -> bool {
    !package.is_empty()
        && !package.starts_with('.')
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}
