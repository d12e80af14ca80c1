//! The provisioning job: read every CSV file, locate the user store, then
//! provision all rows inside the configured tenant.
//!
//! [`ProvisionJob::run`] executes the whole pipeline on the calling thread.
//! [`ProvisionJob::spawn`] moves it onto the tokio blocking pool and hands
//! back a [`ProvisionHandle`] the host can await or cancel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ProvisionConfig;
use crate::csv_source::{list_csv_files, read_csv_file};
use crate::errors::ProvisionError;
use crate::provisioner::{Provisioner, RunReport};
use crate::store::{locate_user_store, TenantGuard, TenantScope, UserStoreProvider};

/// Shared cancellation flag; set it to request a stop.
pub type ShutdownFlag = Arc<AtomicBool>;

/// One bulk provisioning run and its collaborators.
pub struct ProvisionJob {
    config: Arc<ProvisionConfig>,
    provider: Arc<dyn UserStoreProvider>,
    tenants: Arc<dyn TenantScope>,
    shutdown: ShutdownFlag,
}

impl ProvisionJob {
    pub fn new(
        config: Arc<ProvisionConfig>,
        provider: Arc<dyn UserStoreProvider>,
        tenants: Arc<dyn TenantScope>,
    ) -> Self {
        Self {
            config,
            provider,
            tenants,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Run the job on the tokio blocking pool.
    pub fn spawn(self) -> ProvisionHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::task::spawn_blocking(move || self.run());
        info!("bulk user provisioning started");
        ProvisionHandle { task, shutdown }
    }

    /// Run the full pipeline on the current thread.
    pub fn run(&self) -> Result<RunReport, ProvisionError> {
        let result = self.run_inner();
        match &result {
            Ok(report) => info!(
                files = report.files,
                rows = report.rows_read,
                duplicates = report.duplicates_dropped,
                skipped = report.skipped_without_username,
                created = report.users_created,
                failed = report.users_failed,
                read_ms = report.read_ms,
                provision_ms = report.provision_ms,
                "bulk user provisioning finished"
            ),
            Err(e) => error!(code = e.code(), kind = %e.kind(), error = %e, "bulk user provisioning failed"),
        }
        result
    }

    fn run_inner(&self) -> Result<RunReport, ProvisionError> {
        let config = self.config.as_ref();
        let started = Instant::now();
        let mut report = RunReport {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        info!(dir = %config.csv_dir.display(), "reading CSV files and checking columns");
        let paths = list_csv_files(&config.csv_dir)?;

        let mut files = Vec::with_capacity(paths.len());
        for (order, path) in paths.iter().enumerate() {
            self.check_shutdown(0)?;
            info!(file = %path.display(), order, "reading CSV file");
            let file = read_csv_file(path, config)?;
            report.files += 1;
            report.rows_read += file.rows.len() + file.rows.duplicates();
            report.duplicates_dropped += file.rows.duplicates();
            files.push(file);
        }

        let read_done = Instant::now();
        report.read_ms = millis(read_done - started);
        info!(
            elapsed_ms = report.read_ms,
            "finished reading CSV files and checking columns"
        );

        let store = locate_user_store(config, self.provider.as_ref(), &self.shutdown)?;

        let tenant_id = self
            .tenants
            .tenant_id(&config.tenant_domain)
            .map_err(|source| ProvisionError::TenantResolution {
                domain: config.tenant_domain.clone(),
                source,
            })?;

        info!(
            tenant = %config.tenant_domain,
            tenant_id,
            domain = store.domain(),
            "starting user provisioning"
        );
        {
            let _tenant = TenantGuard::enter(self.tenants.as_ref(), &config.tenant_domain, tenant_id);
            Provisioner::new(config, store.as_ref(), &self.shutdown).provision(&files, &mut report)?;
        }

        report.provision_ms = millis(read_done.elapsed());
        report.completed_at = Some(Utc::now().to_rfc3339());
        Ok(report)
    }

    fn check_shutdown(&self, processed: usize) -> Result<(), ProvisionError> {
        if self.shutdown.load(Ordering::SeqCst) {
            warn!("shutdown requested, aborting provisioning");
            return Err(ProvisionError::Cancelled { processed });
        }
        Ok(())
    }
}

/// A running job.
pub struct ProvisionHandle {
    task: JoinHandle<Result<RunReport, ProvisionError>>,
    shutdown: ShutdownFlag,
}

impl ProvisionHandle {
    /// Ask the job to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<RunReport, ProvisionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ProvisionError::Unexpected(e.to_string())),
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    duration.as_millis() as u64
}
