//! Bulk user provisioning core library.
//!
//! This crate reads users from CSV files and creates them in a user store:
//! configuration loading, CSV discovery and header validation, user store
//! location (with a bounded wait for secondary stores), tenant scoping, the
//! provisioning driver, and a SQLite-backed directory that implements the
//! store traits.

pub mod config;
pub mod csv_source;
pub mod db;
pub mod errors;
pub mod job;
pub mod provisioner;
pub mod store;

// Re-exports for convenience.
pub use config::ProvisionConfig;
pub use db::{Database, DirectoryDb};
pub use errors::{ErrorKind, ProvisionError};
pub use job::{ProvisionHandle, ProvisionJob, ShutdownFlag};
pub use provisioner::RunReport;
