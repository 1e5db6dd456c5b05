//! Intent Firewall rule files: model, persistence and the cached engine.

pub mod backup;
pub mod firewall;
pub mod rules;
pub mod store;

pub use backup::{export_rules, import_rules, ImportOptions, ImportReport};
pub use firewall::{BatchOutcome, BatchReport, IntentFirewall};
pub use rules::{Bucket, Rules};
pub use store::RuleStore;
