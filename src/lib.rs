//! Blocker: disable Android app components with Intent Firewall rules or
//! the package manager, from a rooted shell.
//!
//! The core is [`ifw::IntentFirewall`], which keeps one rule set per package
//! cached in memory and persists it to `/data/system/ifw/<package>.xml`
//! through a [`shell::RootShell`].

pub mod component;
pub mod config;
pub mod controller;
pub mod error;
pub mod ifw;
pub mod logging;
pub mod resolver;
pub mod shell;

pub use component::{ComponentName, ComponentType};
pub use config::Config;
pub use error::{BlockerError, Result};
