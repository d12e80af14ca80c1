//! User store capabilities consumed by the provisioning job.
//!
//! The job never talks to a concrete directory. The host hands it a
//! [`UserStoreProvider`] (to find the target store) and a [`TenantScope`]
//! (to resolve the tenant and run the inserts inside it). The SQLite
//! directory in [`crate::db`] implements both; tests use in-memory fakes.

pub mod locator;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::StoreError;

pub use locator::{locate_user_store, SECONDARY_POLL_INTERVAL};

/// Everything a store needs to create one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub roles: &'a [String],
    /// Claim URI -> value.
    pub claims: &'a HashMap<String, String>,
    pub profile: Option<&'a str>,
    pub require_password_change: bool,
}

/// A user store that can create users.
pub trait UserStore: Send + Sync {
    /// Domain name the store is registered under.
    fn domain(&self) -> &str;

    /// Create a user with its roles and claims.
    fn add_user(&self, user: &NewUser<'_>) -> Result<(), StoreError>;
}

/// Supplies user store handles.
pub trait UserStoreProvider: Send + Sync {
    /// The host's default store, if it is available.
    fn primary(&self) -> Option<Arc<dyn UserStore>>;

    /// A secondary store by domain name, or `None` while it is not (yet)
    /// registered.
    fn secondary(&self, domain: &str) -> Option<Arc<dyn UserStore>>;
}

/// Tenant resolution and the tenant context inserts run under.
pub trait TenantScope: Send + Sync {
    fn tenant_id(&self, domain: &str) -> Result<i64, StoreError>;

    fn enter_tenant(&self, domain: &str, tenant_id: i64);

    fn exit_tenant(&self);
}

/// Keeps a tenant scope entered until dropped.
pub struct TenantGuard<'a> {
    scope: &'a dyn TenantScope,
}

impl<'a> TenantGuard<'a> {
    pub fn enter(scope: &'a dyn TenantScope, domain: &str, tenant_id: i64) -> Self {
        debug!(domain, tenant_id, "entering tenant scope");
        scope.enter_tenant(domain, tenant_id);
        Self { scope }
    }
}

impl Drop for TenantGuard<'_> {
    fn drop(&mut self) {
        debug!("exiting tenant scope");
        self.scope.exit_tenant();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingScope {
        events: Mutex<Vec<String>>,
    }

    impl TenantScope for RecordingScope {
        fn tenant_id(&self, _domain: &str) -> Result<i64, StoreError> {
            Ok(1)
        }

        fn enter_tenant(&self, domain: &str, tenant_id: i64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("enter {domain} {tenant_id}"));
        }

        fn exit_tenant(&self) {
            self.events.lock().unwrap().push("exit".into());
        }
    }

    #[test]
    fn test_tenant_guard_exits_on_drop() {
        let scope = RecordingScope::default();
        {
            let _guard = TenantGuard::enter(&scope, "acme.com", 7);
            assert_eq!(scope.events.lock().unwrap().len(), 1);
        }
        assert_eq!(
            *scope.events.lock().unwrap(),
            vec!["enter acme.com 7".to_string(), "exit".to_string()]
        );
    }
}
