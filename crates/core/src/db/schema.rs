//! Directory schema definitions and migration runner.
//!
//! Migrations are SQL strings applied in order; the SQLite `user_version`
//! pragma records which have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial directory schema",
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id          INTEGER PRIMARY KEY,
            domain      TEXT    NOT NULL UNIQUE COLLATE NOCASE,
            created_at  TEXT    NOT NULL
        );

        INSERT OR IGNORE INTO tenants (id, domain, created_at)
        VALUES (-1234, 'carbon.super', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));

        CREATE TABLE IF NOT EXISTS user_stores (
            domain      TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL
        );

        INSERT OR IGNORE INTO user_stores (domain, created_at)
        VALUES ('PRIMARY', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));

        CREATE TABLE IF NOT EXISTS users (
            id                       TEXT    PRIMARY KEY,
            tenant_id                INTEGER NOT NULL REFERENCES tenants (id),
            store_domain             TEXT    NOT NULL REFERENCES user_stores (domain),
            username                 TEXT    NOT NULL,
            password_hash            TEXT    NOT NULL,
            profile                  TEXT,
            require_password_change  INTEGER NOT NULL DEFAULT 0,
            created_at               TEXT    NOT NULL,
            UNIQUE (tenant_id, store_domain, username)
        );

        CREATE INDEX IF NOT EXISTS idx_users_tenant ON users (tenant_id);

        CREATE TABLE IF NOT EXISTS user_roles (
            user_id  TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            role     TEXT NOT NULL,
            PRIMARY KEY (user_id, role)
        );

        CREATE TABLE IF NOT EXISTS user_claims (
            user_id    TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            claim_uri  TEXT NOT NULL,
            value      TEXT NOT NULL,
            PRIMARY KEY (user_id, claim_uri)
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
