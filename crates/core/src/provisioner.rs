//! Provisioning driver: turns collected CSV rows into create-user calls.
//!
//! Files are processed in the order they were read and rows in insertion
//! order. A row without a username is skipped. Every other column that is
//! not the username, password or role column becomes a claim when the
//! claim table maps it. A failure to create one user is logged and counted;
//! it never stops the batch.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ProvisionConfig;
use crate::csv_source::{ColumnIndex, CsvFile};
use crate::errors::ProvisionError;
use crate::store::{NewUser, UserStore};

/// Counters and timings for one provisioning run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub files: usize,
    /// Data rows read, duplicates included.
    pub rows_read: usize,
    pub duplicates_dropped: usize,
    pub skipped_without_username: usize,
    pub users_created: usize,
    pub users_failed: usize,
    pub read_ms: u64,
    pub provision_ms: u64,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Sends the rows of every file to one user store.
pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    store: &'a dyn UserStore,
    shutdown: &'a AtomicBool,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        config: &'a ProvisionConfig,
        store: &'a dyn UserStore,
        shutdown: &'a AtomicBool,
    ) -> Self {
        Self {
            config,
            store,
            shutdown,
        }
    }

    /// Provision every row of every file, updating `report` as it goes.
    ///
    /// Rows are handled in chunks of `rows_per_fetch`; a shutdown request is
    /// honoured at the end of a chunk.
    pub fn provision(&self, files: &[CsvFile], report: &mut RunReport) -> Result<(), ProvisionError> {
        let mut processed = 0usize;

        for (order, file) in files.iter().enumerate() {
            info!(
                file = %file.path.display(),
                order,
                rows = file.rows.len(),
                domain = self.store.domain(),
                "provisioning users from file"
            );
            let mut unmapped = BTreeSet::new();

            for chunk in file.rows.as_slice().chunks(self.config.rows_per_fetch.max(1)) {
                for row in chunk {
                    self.provision_row(&file.columns, row, &mut unmapped, report);
                }
                processed += chunk.len();
                debug!(
                    processed,
                    created = report.users_created,
                    failed = report.users_failed,
                    "provisioning progress"
                );

                if self.shutdown.load(Ordering::SeqCst) {
                    info!(processed, "shutdown requested, stopping provisioning");
                    return Err(ProvisionError::Cancelled { processed });
                }
            }

            if !unmapped.is_empty() {
                info!(
                    file = %file.path.display(),
                    columns = ?unmapped,
                    "CSV columns without a claim mapping were not provisioned"
                );
            }
        }

        Ok(())
    }

    fn provision_row(
        &self,
        columns: &ColumnIndex,
        row: &[String],
        unmapped: &mut BTreeSet<String>,
        report: &mut RunReport,
    ) {
        let username = match row.get(columns.username()) {
            Some(name) if !name.is_empty() => name.as_str(),
            _ => {
                report.skipped_without_username += 1;
                return;
            }
        };

        let Some(password) = row.get(columns.password()) else {
            error!(username, "row has no value for the password column, user not added");
            report.users_failed += 1;
            return;
        };

        let claims = self.build_claims(columns, row, unmapped);
        let roles = self.roles_for(columns, row);

        let user = NewUser {
            username,
            password,
            roles: &roles,
            claims: &claims,
            profile: None,
            require_password_change: false,
        };

        match self.store.add_user(&user) {
            Ok(()) => {
                debug!(username, roles = roles.len(), claims = claims.len(), "user added");
                report.users_created += 1;
            }
            Err(e) => {
                error!(username, error = %e, "error occurred while adding user");
                report.users_failed += 1;
            }
        }
    }

    /// Claim URI -> value for every mapped, non-reserved column of `row`.
    pub fn build_claims(
        &self,
        columns: &ColumnIndex,
        row: &[String],
        unmapped: &mut BTreeSet<String>,
    ) -> HashMap<String, String> {
        let mut claims = HashMap::new();
        for (idx, column) in columns.header().iter().enumerate() {
            if columns.is_reserved(idx) {
                continue;
            }
            let Some(value) = row.get(idx) else {
                continue;
            };
            match self.config.claims.claim_for(column) {
                Some(uri) => {
                    claims.insert(uri.to_string(), value.clone());
                }
                None => {
                    debug!(column = %column, "CSV column does not map to a configured claim");
                    unmapped.insert(column.clone());
                }
            }
        }
        claims
    }

    /// The role cell as a one-element list, when roles are imported and the
    /// file has a non-empty role cell.
    pub fn roles_for(&self, columns: &ColumnIndex, row: &[String]) -> Vec<String> {
        if !self.config.role_field_exists() {
            return Vec::new();
        }
        columns
            .role()
            .and_then(|idx| row.get(idx))
            .filter(|role| !role.is_empty())
            .map(|role| vec![role.clone()])
            .unwrap_or_default()
    }
}
