//! Typed query helpers for the directory tables.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `tenants` table with its user count.
#[derive(Debug, Clone)]
pub struct TenantEntry {
    pub id: i64,
    pub domain: String,
    pub created_at: String,
    pub user_count: i64,
}

/// A row from the `user_stores` table with its user count.
#[derive(Debug, Clone)]
pub struct UserStoreEntry {
    pub domain: String,
    pub created_at: String,
    pub user_count: i64,
}

/// A user with its roles and claims.
#[derive(Debug, Clone)]
pub struct UserEntry {
    pub id: String,
    pub tenant_domain: String,
    pub store_domain: String,
    pub username: String,
    pub roles: Vec<String>,
    pub claims: BTreeMap<String, String>,
    pub created_at: String,
}

/// Input for [`Database::insert_user`].
#[derive(Debug, Clone)]
pub struct NewUserRecord<'a> {
    pub tenant_id: i64,
    pub store_domain: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub roles: &'a [String],
    pub claims: &'a std::collections::HashMap<String, String>,
    pub profile: Option<&'a str>,
    pub require_password_change: bool,
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- tenants -------------------------------------------------------------

    /// Register a tenant and return its id. An existing tenant keeps its id.
    pub fn insert_tenant(&self, domain: &str) -> Result<i64, DatabaseError> {
        self.transaction(|conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM tenants WHERE domain = ?1",
                    params![domain],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }

            let id: i64 = conn.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM tenants WHERE id > 0",
                [],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO tenants (id, domain, created_at) VALUES (?1, ?2, ?3)",
                params![id, domain, Utc::now().to_rfc3339()],
            )?;
            debug!(id, domain, "inserted tenant");
            Ok(id)
        })
    }

    /// Look up a tenant id by domain (case-insensitive).
    pub fn get_tenant_id(&self, domain: &str) -> Result<Option<i64>, DatabaseError> {
        let conn = self.conn();
        let id = conn
            .query_row(
                "SELECT id FROM tenants WHERE domain = ?1",
                params![domain],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn list_tenants(&self) -> Result<Vec<TenantEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.domain, t.created_at, COUNT(u.id)
             FROM tenants t LEFT JOIN users u ON u.tenant_id = t.id
             GROUP BY t.id ORDER BY t.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TenantEntry {
                id: row.get(0)?,
                domain: row.get(1)?,
                created_at: row.get(2)?,
                user_count: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // -- user_stores ---------------------------------------------------------

    /// Register a user store domain. Domains are stored upper-cased.
    /// Returns `false` if it was already registered.
    pub fn insert_user_store(&self, domain: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO user_stores (domain, created_at) VALUES (?1, ?2)",
            params![domain.to_uppercase(), Utc::now().to_rfc3339()],
        )?;
        debug!(domain, inserted = changed > 0, "registered user store");
        Ok(changed > 0)
    }

    pub fn user_store_exists(&self, domain: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_stores WHERE domain = ?1",
            params![domain.to_uppercase()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_user_stores(&self) -> Result<Vec<UserStoreEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.domain, s.created_at, COUNT(u.id)
             FROM user_stores s LEFT JOIN users u ON u.store_domain = s.domain
             GROUP BY s.domain ORDER BY s.domain",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserStoreEntry {
                domain: row.get(0)?,
                created_at: row.get(1)?,
                user_count: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // -- users ---------------------------------------------------------------

    /// Insert a user with its roles and claims in one transaction.
    ///
    /// Returns the new user id, or `None` if the username is already taken
    /// in that tenant and store.
    pub fn insert_user(&self, user: &NewUserRecord<'_>) -> Result<Option<String>, DatabaseError> {
        self.transaction(|conn| {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users
                 WHERE tenant_id = ?1 AND store_domain = ?2 AND username = ?3",
                params![user.tenant_id, user.store_domain, user.username],
                |row| row.get(0),
            )?;
            if exists > 0 {
                return Ok(None);
            }

            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO users (id, tenant_id, store_domain, username, password_hash,
                                    profile, require_password_change, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    user.tenant_id,
                    user.store_domain,
                    user.username,
                    user.password_hash,
                    user.profile,
                    user.require_password_change,
                    Utc::now().to_rfc3339(),
                ],
            )?;

            for role in user.roles {
                conn.execute(
                    "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
                    params![id, role],
                )?;
            }
            for (uri, value) in user.claims {
                conn.execute(
                    "INSERT INTO user_claims (user_id, claim_uri, value) VALUES (?1, ?2, ?3)",
                    params![id, uri, value],
                )?;
            }

            debug!(id = %id, username = user.username, "inserted user");
            Ok(Some(id))
        })
    }

    /// Stored password hash for a user.
    pub fn get_password_hash(
        &self,
        tenant_id: i64,
        store_domain: &str,
        username: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let hash = conn
            .query_row(
                "SELECT password_hash FROM users
                 WHERE tenant_id = ?1 AND store_domain = ?2 AND username = ?3",
                params![tenant_id, store_domain, username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// List users, newest first, optionally restricted to one tenant.
    pub fn list_users(
        &self,
        tenant_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<UserEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT u.id, t.domain, u.store_domain, u.username, u.created_at
             FROM users u JOIN tenants t ON t.id = u.tenant_id
             WHERE ?1 IS NULL OR u.tenant_id = ?1
             ORDER BY u.created_at DESC, u.username
             LIMIT ?2",
        )?;
        let mut users = stmt
            .query_map(params![tenant_id, limit], |row| {
                Ok(UserEntry {
                    id: row.get(0)?,
                    tenant_domain: row.get(1)?,
                    store_domain: row.get(2)?,
                    username: row.get(3)?,
                    roles: Vec::new(),
                    claims: BTreeMap::new(),
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut roles_stmt =
            conn.prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")?;
        let mut claims_stmt =
            conn.prepare("SELECT claim_uri, value FROM user_claims WHERE user_id = ?1")?;
        for user in &mut users {
            user.roles = roles_stmt
                .query_map(params![user.id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            user.claims = claims_stmt
                .query_map(params![user.id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<BTreeMap<String, String>, _>>()?;
        }

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_tenants() {
        let db = db();
        assert_eq!(db.get_tenant_id("carbon.super").unwrap(), Some(-1234));

        let id = db.insert_tenant("acme.com").unwrap();
        assert_eq!(id, 1);
        assert_eq!(db.insert_tenant("ACME.com").unwrap(), 1);
        assert_eq!(db.insert_tenant("globex.com").unwrap(), 2);
        let tenants = db.list_tenants().unwrap();
        assert!(tenants.iter().any(|t| t.id == 2 && t.domain == "globex.com"));
        assert_eq!(db.get_tenant_id("missing.com").unwrap(), None);
        assert_eq!(db.list_tenants().unwrap().len(), 3);
    }

    #[test]
    fn test_user_stores() {
        let db = db();
        assert!(db.user_store_exists("primary").unwrap());
        assert!(!db.user_store_exists("LDAP").unwrap());

        assert!(db.insert_user_store("ldap").unwrap());
        assert!(!db.insert_user_store("LDAP").unwrap());
        assert!(db.user_store_exists("Ldap").unwrap());

        let domains: Vec<_> = db
            .list_user_stores()
            .unwrap()
            .into_iter()
            .map(|s| s.domain)
            .collect();
        assert_eq!(domains, vec!["LDAP", "PRIMARY"]);
    }

    #[test]
    fn test_insert_and_list_users() {
        let db = db();
        let roles = vec!["admin".to_string()];
        let mut claims = HashMap::new();
        claims.insert("http://claim/dept".to_string(), "eng".to_string());

        let record = NewUserRecord {
            tenant_id: -1234,
            store_domain: "PRIMARY",
            username: "alice",
            password_hash: "hash",
            roles: &roles,
            claims: &claims,
            profile: None,
            require_password_change: false,
        };
        assert!(db.insert_user(&record).unwrap().is_some());
        assert!(db.insert_user(&record).unwrap().is_none());

        let users = db.list_users(None, 10).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].tenant_domain, "carbon.super");
        assert_eq!(users[0].roles, vec!["admin"]);
        assert_eq!(users[0].claims["http://claim/dept"], "eng");

        assert!(db.list_users(Some(1), 10).unwrap().is_empty());
        assert_eq!(
            db.get_password_hash(-1234, "PRIMARY", "alice").unwrap().as_deref(),
            Some("hash")
        );
    }
}
