//! Resolves the user store the job provisions into.
//!
//! The primary store is requested once. A secondary store may be registered
//! by the host some time after startup, so it is polled at a fixed interval
//! until it appears or the configured wait time runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::{UserStore, UserStoreProvider};
use crate::config::{ProvisionConfig, UserStoreTarget};
use crate::errors::ProvisionError;

/// Delay between attempts to find a secondary store.
pub const SECONDARY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Find the configured user store.
pub fn locate_user_store(
    config: &ProvisionConfig,
    provider: &dyn UserStoreProvider,
    shutdown: &AtomicBool,
) -> Result<Arc<dyn UserStore>, ProvisionError> {
    match &config.user_store {
        UserStoreTarget::Primary => match provider.primary() {
            Some(store) => {
                info!(domain = store.domain(), "using primary user store");
                Ok(store)
            }
            None => {
                error!("primary user store not found");
                Err(ProvisionError::PrimaryStoreNotFound)
            }
        },
        UserStoreTarget::Secondary { domain } => wait_for_secondary(
            provider,
            domain,
            config.secondary_wait,
            SECONDARY_POLL_INTERVAL,
            shutdown,
        ),
    }
}

/// Poll for a secondary store until found or `timeout` has elapsed.
///
/// The last attempt happens at or after the deadline, so a store that
/// appears within `timeout` is always found.
pub fn wait_for_secondary(
    provider: &dyn UserStoreProvider,
    domain: &str,
    timeout: Duration,
    interval: Duration,
    shutdown: &AtomicBool,
) -> Result<Arc<dyn UserStore>, ProvisionError> {
    info!(domain, timeout_ms = timeout.as_millis() as u64, "waiting for secondary user store");
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(store) = provider.secondary(domain) {
            info!(
                domain,
                attempts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "secondary user store found"
            );
            return Ok(store);
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            error!(domain, attempts, "timed out waiting for secondary user store");
            return Err(ProvisionError::SecondaryStoreNotFound {
                domain: domain.to_string(),
                waited_ms: elapsed.as_millis() as u64,
            });
        }
        if shutdown.load(Ordering::SeqCst) {
            return Err(ProvisionError::Cancelled { processed: 0 });
        }

        debug!(domain, attempts, "secondary user store not available yet");
        std::thread::sleep(interval.min(timeout - elapsed));
    }
}
