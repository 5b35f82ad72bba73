//! Core ledger logic.
//!
//! This module contains:
//! - Store: SQLite schema, connection handling and column helpers
//! - Ledger: The facade tying the components together
//! - Run store, step ledger, event log and artifact registry operations
//! - Safety: Artifact path sandboxing and limits

pub mod artifacts;
pub mod error;
pub mod event_log;
pub mod ledger;
pub mod run_store;
pub mod safety;
pub mod step_ledger;
pub mod store;

// Re-export commonly used types
pub use error::{LedgerError, Result};
pub use event_log::Annotation;
pub use ledger::{Ledger, LedgerMessage, Outcome};
pub use safety::{ArtifactPolicy, SafetyViolation};
pub use step_ledger::{hash_input, step_key};
pub use store::{Database, SCHEMA_VERSION};
