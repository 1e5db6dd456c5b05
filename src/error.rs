//! Error types for the blocker library.

use thiserror::Error;

/// Errors produced by the rule engine, controllers and root shell.
#[derive(Error, Debug)]
pub enum BlockerError {
    /// Root is required for the operation and the shell could not obtain it.
    #[error("Root access is not available")]
    RootUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A shell command failed or could not be spawned.
    #[error("Shell error: {0}")]
    Shell(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The resolver could not determine the component's type.
    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    /// The component kind cannot be handled by the selected controller.
    #[error("Unsupported component: {0}")]
    UnsupportedComponent(String),

    #[error("Invalid component name: {0}")]
    InvalidComponent(String),

    /// The APK or its binary manifest could not be read.
    #[error("APK error: {0}")]
    Apk(String),

    /// A delete outside the rule directory was refused.
    #[error("Refusing to delete: {0}")]
    DeleteRefused(String),
}

impl From<zip::result::ZipError> for BlockerError {
    fn from(err: zip::result::ZipError) -> Self {
        BlockerError::Apk(err.to_string())
    }
}

impl From<quick_xml::Error> for BlockerError {
    fn from(err: quick_xml::Error) -> Self {
        BlockerError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BlockerError>;
