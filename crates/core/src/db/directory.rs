//! The directory database exposed as user stores and a tenant scope.

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::queries::NewUserRecord;
use super::Database;
use crate::errors::StoreError;
use crate::store::{NewUser, TenantScope, UserStore, UserStoreProvider};

/// Domain of the default user store.
pub const PRIMARY_DOMAIN: &str = "PRIMARY";

/// Tenant every directory starts with.
pub const SUPER_TENANT_DOMAIN: &str = "carbon.super";
pub const SUPER_TENANT_ID: i64 = -1234;

const DEFAULT_HASH_COST: u32 = 10;

/// The tenant inserts currently run under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub domain: String,
    pub id: i64,
}

/// SQLite user directory.
///
/// Cloning is cheap; clones share the database and the tenant context.
#[derive(Clone)]
pub struct DirectoryDb {
    db: Arc<Database>,
    tenant: Arc<RwLock<Option<TenantContext>>>,
    hash_cost: u32,
}

impl DirectoryDb {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            tenant: Arc::new(RwLock::new(None)),
            hash_cost: DEFAULT_HASH_COST,
        }
    }

    /// Override the bcrypt cost used for new passwords.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The tenant entered through [`TenantScope::enter_tenant`], if any.
    pub fn current_tenant(&self) -> Option<TenantContext> {
        match self.tenant.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_tenant(&self, context: Option<TenantContext>) {
        match self.tenant.write() {
            Ok(mut guard) => *guard = context,
            Err(poisoned) => *poisoned.into_inner() = context,
        }
    }

    fn store(&self, domain: &str) -> Arc<dyn UserStore> {
        Arc::new(SqliteUserStore {
            directory: self.clone(),
            domain: domain.to_uppercase(),
        })
    }
}

impl UserStoreProvider for DirectoryDb {
    fn primary(&self) -> Option<Arc<dyn UserStore>> {
        Some(self.store(PRIMARY_DOMAIN))
    }

    fn secondary(&self, domain: &str) -> Option<Arc<dyn UserStore>> {
        match self.db.user_store_exists(domain) {
            Ok(true) => Some(self.store(domain)),
            Ok(false) => None,
            Err(e) => {
                warn!(domain, error = %e, "failed to look up user store");
                None
            }
        }
    }
}

impl TenantScope for DirectoryDb {
    fn tenant_id(&self, domain: &str) -> Result<i64, StoreError> {
        self.db
            .get_tenant_id(domain)?
            .ok_or_else(|| StoreError::TenantNotFound(domain.to_string()))
    }

    fn enter_tenant(&self, domain: &str, tenant_id: i64) {
        self.set_tenant(Some(TenantContext {
            domain: domain.to_string(),
            id: tenant_id,
        }));
    }

    fn exit_tenant(&self) {
        self.set_tenant(None);
    }
}

/// One store domain inside the directory.
struct SqliteUserStore {
    directory: DirectoryDb,
    domain: String,
}

impl UserStore for SqliteUserStore {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn add_user(&self, user: &NewUser<'_>) -> Result<(), StoreError> {
        if user.password.is_empty() {
            return Err(StoreError::InvalidPassword {
                username: user.username.to_string(),
                detail: "password is empty".into(),
            });
        }

        let tenant_id = self
            .directory
            .current_tenant()
            .map(|t| t.id)
            .unwrap_or(SUPER_TENANT_ID);
        let password_hash = bcrypt::hash(user.password, self.directory.hash_cost)?;

        let record = NewUserRecord {
            tenant_id,
            store_domain: &self.domain,
            username: user.username,
            password_hash: &password_hash,
            roles: user.roles,
            claims: user.claims,
            profile: user.profile,
            require_password_change: user.require_password_change,
        };

        match self.directory.db.insert_user(&record)? {
            Some(id) => {
                debug!(id = %id, username = user.username, tenant_id, domain = %self.domain, "user stored");
                Ok(())
            }
            None => Err(StoreError::UserExists(user.username.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn directory() -> DirectoryDb {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        DirectoryDb::new(Arc::new(db)).with_hash_cost(4)
    }

    fn new_user<'a>(
        username: &'a str,
        password: &'a str,
        roles: &'a [String],
        claims: &'a HashMap<String, String>,
    ) -> NewUser<'a> {
        NewUser {
            username,
            password,
            roles,
            claims,
            profile: None,
            require_password_change: false,
        }
    }

    #[test]
    fn test_primary_and_secondary_lookup() {
        let dir = directory();
        assert_eq!(dir.primary().unwrap().domain(), "PRIMARY");
        assert!(dir.secondary("ldap").is_none());

        dir.database().insert_user_store("ldap").unwrap();
        assert_eq!(dir.secondary("ldap").unwrap().domain(), "LDAP");
    }

    #[test]
    fn test_tenant_scope() {
        let dir = directory();
        assert_eq!(dir.tenant_id(SUPER_TENANT_DOMAIN).unwrap(), SUPER_TENANT_ID);
        assert!(matches!(
            dir.tenant_id("nope.com"),
            Err(StoreError::TenantNotFound(_))
        ));

        dir.enter_tenant("acme.com", 3);
        assert_eq!(dir.clone().current_tenant().map(|t| t.id), Some(3));
        dir.exit_tenant();
        assert!(dir.current_tenant().is_none());
    }

    #[test]
    fn test_add_user_hashes_password_and_rejects_duplicates() {
        let dir = directory();
        let store = dir.primary().unwrap();
        let roles = vec!["admin".to_string()];
        let claims = HashMap::new();

        store
            .add_user(&new_user("alice", "secret", &roles, &claims))
            .unwrap();
        let err = store
            .add_user(&new_user("alice", "other", &roles, &claims))
            .unwrap_err();
        assert!(matches!(err, StoreError::UserExists(_)));

        let hash = dir
            .database()
            .get_password_hash(SUPER_TENANT_ID, PRIMARY_DOMAIN, "alice")
            .unwrap()
            .unwrap();
        assert_ne!(hash, "secret");
        assert!(bcrypt::verify("secret", &hash).unwrap());
    }

    #[test]
    fn test_add_user_uses_entered_tenant() {
        let dir = directory();
        let tenant = dir.database().insert_tenant("acme.com").unwrap();
        let claims = HashMap::new();

        dir.enter_tenant("acme.com", tenant);
        dir.primary()
            .unwrap()
            .add_user(&new_user("bob", "pw", &[], &claims))
            .unwrap();
        dir.exit_tenant();

        let users = dir.database().list_users(Some(tenant), 10).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].tenant_domain, "acme.com");
    }

    #[test]
    fn test_empty_password_is_rejected() {
        let dir = directory();
        let claims = HashMap::new();
        let err = dir
            .primary()
            .unwrap()
            .add_user(&new_user("carol", "", &[], &claims))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPassword { .. }));
    }
}
