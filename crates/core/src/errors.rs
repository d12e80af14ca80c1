//! Error types for the bulk provisioning library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and the
//! top-level [`ProvisionError`] unifies them for the job runner. Every
//! top-level error carries a stable `BUP-*` code and is classified as a
//! client error (bad input or configuration) or a server error (I/O,
//! backend, or unexpected failure).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Whether an error was caused by the operator's input or by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration, missing CSV input, malformed headers.
    Client,
    /// I/O failures, backend failures, unexpected conditions.
    Server,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Csv(#[from] CsvError),

    /// The host could not supply the primary user store.
    #[error("primary user store not found")]
    PrimaryStoreNotFound,

    /// The named secondary user store did not appear before the deadline.
    #[error("secondary user store '{domain}' not found after waiting {waited_ms} ms")]
    SecondaryStoreNotFound { domain: String, waited_ms: u64 },

    /// The configured tenant domain could not be resolved to an id.
    #[error("failed to resolve tenant id for domain '{domain}': {source}")]
    TenantResolution {
        domain: String,
        #[source]
        source: StoreError,
    },

    /// A shutdown was requested while the run was in progress.
    #[error("provisioning cancelled after {processed} rows")]
    Cancelled { processed: usize },

    /// The background task panicked or was aborted.
    #[error("an unexpected error occurred: {0}")]
    Unexpected(String),
}

impl ProvisionError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Csv(e) => e.code(),
            Self::PrimaryStoreNotFound => "BUP-65006",
            Self::SecondaryStoreNotFound { .. } => "BUP-65007",
            Self::TenantResolution { .. } => "BUP-65008",
            Self::Cancelled { .. } => "BUP-65010",
            Self::Unexpected(_) => "BUP-65003",
        }
    }

    /// Client or server classification, derived from the code range.
    pub fn kind(&self) -> ErrorKind {
        if self.code().starts_with("BUP-600") {
            ErrorKind::Client
        } else {
            ErrorKind::Server
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found or not a regular file.
    #[error("bulk user provision config file not found: {0}")]
    FileNotFound(String),

    /// Generic I/O error reading the config file.
    #[error("error while reading bulk user provision configs: {0}")]
    IoError(#[from] std::io::Error),

    /// The properties document could not be parsed.
    #[error("malformed bulk user provision config: {0}")]
    Malformed(#[from] java_properties::PropertiesError),

    /// A secondary store was selected without naming its domain.
    #[error("user store configuration invalid: isPrimaryUserStore is false but secondaryUserStoreDomain is not set")]
    SecondaryDomainMissing,

    /// A `claims` entry did not split into exactly a column and a claim URI.
    #[error("invalid claim mapping '{entry}': {detail}")]
    InvalidClaimMapping { entry: String, detail: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound(_) => "BUP-60001",
            Self::IoError(_) | Self::Malformed(_) => "BUP-65004",
            Self::SecondaryDomainMissing => "BUP-60004",
            Self::InvalidClaimMapping { .. } => "BUP-60007",
            Self::InvalidValue { .. } => "BUP-60008",
        }
    }
}

// ---------------------------------------------------------------------------
// CSV errors
// ---------------------------------------------------------------------------

/// Errors from locating and reading CSV input.
#[derive(Debug, Error)]
pub enum CsvError {
    /// The configured CSV directory does not exist.
    #[error("CSV file directory not found: {0}")]
    DirectoryNotFound(String),

    /// The CSV directory contains no `.csv` files.
    #[error("no CSV files found in {0}")]
    NoFilesFound(String),

    /// A recognized field occurs more than once in a header row.
    #[error("field {field} ('{column}') duplicated in the header of {file}")]
    DuplicateColumn {
        field: String,
        column: String,
        file: String,
    },

    /// A mandatory field is absent from a header row.
    #[error("required field {field} ('{column}') not found in the header of {file}")]
    MissingColumn {
        field: String,
        column: String,
        file: String,
    },

    /// Listing or opening a CSV file failed.
    #[error("error reading CSV input at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The CSV reader rejected a record.
    #[error("error parsing CSV file {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: csv::Error,
    },
}

impl CsvError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DirectoryNotFound(_) => "BUP-60003",
            Self::NoFilesFound(_) => "BUP-60002",
            Self::DuplicateColumn { .. } => "BUP-60005",
            Self::MissingColumn { .. } => "BUP-60006",
            Self::Io { .. } | Self::Parse { .. } => "BUP-65005",
        }
    }
}

// ---------------------------------------------------------------------------
// User store errors
// ---------------------------------------------------------------------------

/// Errors reported by a user store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A user with the same name already exists in the store.
    #[error("user '{0}' already exists")]
    UserExists(String),

    /// The password was rejected.
    #[error("invalid password for user '{username}': {detail}")]
    InvalidPassword { username: String, detail: String },

    /// No tenant is registered under the domain.
    #[error("tenant '{0}' not found")]
    TenantNotFound(String),

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    /// The directory database failed.
    #[error("user store database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite directory database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },
}
