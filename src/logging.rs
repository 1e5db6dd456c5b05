//! Tracing subscriber setup.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::error::BlockerError;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn,blocker=info";

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = BlockerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(BlockerError::Config(format!(
                "unknown log format '{}'. Use: text, json",
                other
            ))),
        }
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
