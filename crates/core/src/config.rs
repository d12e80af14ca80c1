//! Properties-based configuration for the bulk provisioning job.
//!
//! The job is governed by a flat `key=value` file at a well-known location
//! under the host home directory (see [`default_config_path`]). Values are
//! trimmed; blank values fall back to the documented defaults. The loaded
//! [`ProvisionConfig`] is immutable for the rest of the run.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Well-known locations and keys
// ---------------------------------------------------------------------------

/// File name of the properties file.
pub const CONFIG_FILE_NAME: &str = "bulk-user-provision-config.properties";

pub const DEFAULT_TENANT_DOMAIN: &str = "carbon.super";
pub const DEFAULT_ROWS_PER_FETCH: usize = 100;
pub const DEFAULT_THREAD_POOL_SIZE: usize = 4;
pub const DEFAULT_SECONDARY_WAIT_MS: u64 = 30_000;
pub const DEFAULT_USERNAME_FIELD: &str = "username";
pub const DEFAULT_PASSWORD_FIELD: &str = "password";
pub const DEFAULT_ROLE_FIELD: &str = "role";

pub const KEY_IS_ENABLED: &str = "isEnabled";
pub const KEY_IS_PRIMARY_USER_STORE: &str = "isPrimaryUserStore";
pub const KEY_SECONDARY_USER_STORE_DOMAIN: &str = "secondaryUserStoreDomain";
pub const KEY_SECONDARY_WAIT: &str = "waitingTimeForSecondaryUserStore";
pub const KEY_ROWS_PER_FETCH: &str = "noOfRowsFetch";
pub const KEY_THREAD_POOL_SIZE: &str = "threadPoolSize";
pub const KEY_TENANT_DOMAIN: &str = "tenantDomain";
pub const KEY_USERNAME_FIELD: &str = "usernameField";
pub const KEY_PASSWORD_FIELD: &str = "passwordField";
pub const KEY_ROLE_FIELD_EXIST: &str = "roleFieldExist";
pub const KEY_ROLE_FIELD: &str = "roleField";
pub const KEY_CLAIMS: &str = "claims";
pub const KEY_CSV_DIRECTORY: &str = "csvDirectory";

/// Path of the properties file relative to a host home directory:
/// `<home>/migration/bulk-user-provision/bulk-user-provision-config.properties`.
pub fn default_config_path(home: &Path) -> PathBuf {
    home.join("migration")
        .join("bulk-user-provision")
        .join(CONFIG_FILE_NAME)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which user store the users are provisioned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserStoreTarget {
    /// The host's default user store.
    Primary,
    /// A secondary store resolved by its domain name.
    Secondary { domain: String },
}

/// Mapping from CSV column name to backend claim URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimTable {
    entries: HashMap<String, String>,
}

impl ClaimTable {
    /// Parse `col1,uri1;col2,uri2;...`.
    ///
    /// Blank entries (such as the one after a trailing `;`) are ignored. Any
    /// other entry must split into exactly two non-empty parts.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut entries = HashMap::new();
        for entry in raw.split(';') {
            if entry.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
            match parts.as_slice() {
                [column, uri] if !column.is_empty() && !uri.is_empty() => {
                    entries.insert(column.to_string(), uri.to_string());
                }
                [_, _] => {
                    return Err(ConfigError::InvalidClaimMapping {
                        entry: entry.trim().to_string(),
                        detail: "column name and claim URI must not be empty".into(),
                    });
                }
                _ => {
                    return Err(ConfigError::InvalidClaimMapping {
                        entry: entry.trim().to_string(),
                        detail: format!(
                            "expected '<column>,<claim URI>' but found {} part(s)",
                            parts.len()
                        ),
                    });
                }
            }
        }
        Ok(Self { entries })
    }

    /// Claim URI for a CSV column, if mapped.
    pub fn claim_for(&self, column: &str) -> Option<&str> {
        self.entries.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Fully resolved configuration for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Whether the job runs at all.
    pub enabled: bool,

    /// Target user store.
    pub user_store: UserStoreTarget,

    /// How long to wait for a secondary store to become available.
    pub secondary_wait: Duration,

    /// Tenant under which users are created.
    pub tenant_domain: String,

    /// Number of rows provisioned between progress checkpoints.
    pub rows_per_fetch: usize,

    /// Header name of the username column.
    pub username_field: String,

    /// Header name of the password column.
    pub password_field: String,

    /// Header name of the role column; `None` when roles are not imported.
    pub role_field: Option<String>,

    /// CSV column to claim URI mapping.
    pub claims: ClaimTable,

    /// Size of the blocking pool the job runs on.
    pub thread_pool_size: usize,

    /// Directory scanned for `.csv` files.
    pub csv_dir: PathBuf,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_store: UserStoreTarget::Primary,
            secondary_wait: Duration::from_millis(DEFAULT_SECONDARY_WAIT_MS),
            tenant_domain: DEFAULT_TENANT_DOMAIN.into(),
            rows_per_fetch: DEFAULT_ROWS_PER_FETCH,
            username_field: DEFAULT_USERNAME_FIELD.into(),
            password_field: DEFAULT_PASSWORD_FIELD.into(),
            role_field: None,
            claims: ClaimTable::default(),
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            csv_dir: PathBuf::from("."),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ProvisionConfig {
    /// Load the configuration from a properties file.
    ///
    /// The CSV directory defaults to the directory containing the file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading bulk user provision configuration");

        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let file = std::fs::File::open(path)?;
        let props = parse_properties(std::io::BufReader::new(file))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let config = Self::from_properties(&props, base_dir)?;
        debug!(?config, "configuration parsed successfully");
        Ok(config)
    }

    /// Build a configuration from already-parsed properties.
    ///
    /// A relative `csvDirectory` is resolved against `base_dir`.
    pub fn from_properties(
        props: &HashMap<String, String>,
        base_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let enabled = flag(props, KEY_IS_ENABLED);

        let user_store = match value(props, KEY_IS_PRIMARY_USER_STORE) {
            None => UserStoreTarget::Primary,
            Some(raw) if raw.eq_ignore_ascii_case("true") => UserStoreTarget::Primary,
            Some(_) => match value(props, KEY_SECONDARY_USER_STORE_DOMAIN) {
                Some(domain) => UserStoreTarget::Secondary {
                    domain: domain.to_string(),
                },
                None => return Err(ConfigError::SecondaryDomainMissing),
            },
        };

        let role_field = if flag(props, KEY_ROLE_FIELD_EXIST) {
            Some(text_or(props, KEY_ROLE_FIELD, DEFAULT_ROLE_FIELD))
        } else {
            None
        };

        let claims = match value(props, KEY_CLAIMS) {
            Some(raw) => ClaimTable::parse(raw)?,
            None => ClaimTable::default(),
        };

        let csv_dir = match value(props, KEY_CSV_DIRECTORY) {
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        let config = Self {
            enabled,
            user_store,
            secondary_wait: Duration::from_millis(number_or(
                props,
                KEY_SECONDARY_WAIT,
                DEFAULT_SECONDARY_WAIT_MS,
            )?),
            tenant_domain: text_or(props, KEY_TENANT_DOMAIN, DEFAULT_TENANT_DOMAIN),
            rows_per_fetch: number_or(props, KEY_ROWS_PER_FETCH, DEFAULT_ROWS_PER_FETCH)?,
            username_field: text_or(props, KEY_USERNAME_FIELD, DEFAULT_USERNAME_FIELD),
            password_field: text_or(props, KEY_PASSWORD_FIELD, DEFAULT_PASSWORD_FIELD),
            role_field,
            claims,
            thread_pool_size: number_or(props, KEY_THREAD_POOL_SIZE, DEFAULT_THREAD_POOL_SIZE)?,
            csv_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let UserStoreTarget::Secondary { domain } = &self.user_store {
            if domain.trim().is_empty() {
                return Err(ConfigError::SecondaryDomainMissing);
            }
        }
        if self.rows_per_fetch == 0 {
            return Err(ConfigError::InvalidValue {
                field: KEY_ROWS_PER_FETCH.into(),
                detail: "must be greater than 0".into(),
            });
        }
        if self.thread_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: KEY_THREAD_POOL_SIZE.into(),
                detail: "must be greater than 0".into(),
            });
        }
        if self.username_field == self.password_field {
            return Err(ConfigError::InvalidValue {
                field: KEY_PASSWORD_FIELD.into(),
                detail: "must differ from usernameField".into(),
            });
        }
        if let Some(role) = &self.role_field {
            if role == &self.username_field || role == &self.password_field {
                return Err(ConfigError::InvalidValue {
                    field: KEY_ROLE_FIELD.into(),
                    detail: "must differ from usernameField and passwordField".into(),
                });
            }
        }
        Ok(())
    }

    /// Whether a role column is expected in the CSV files.
    pub fn role_field_exists(&self) -> bool {
        self.role_field.is_some()
    }
}

// ---------------------------------------------------------------------------
// Properties parsing
// ---------------------------------------------------------------------------

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parse a properties document.
///
/// Keys and values are separated by `=`, `:` or whitespace. Backslash
/// escapes (including `\uXXXX`) and `\` line continuations are honoured,
/// and lines starting with `#` or `!` are comments. Bytes are read as
/// ISO-8859-1 after skipping a leading UTF-8 byte order mark. Later
/// duplicates override earlier ones.
pub fn parse_properties<R: Read>(mut input: R) -> Result<HashMap<String, String>, ConfigError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);
    Ok(java_properties::read(body)?)
}

/// Trimmed, non-blank value for `key`.
fn value<'a>(props: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    props
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn flag(props: &HashMap<String, String>, key: &str) -> bool {
    value(props, key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn text_or(props: &HashMap<String, String>, key: &str, default: &str) -> String {
    value(props, key).unwrap_or(default).to_string()
}

fn number_or<T>(props: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value(props, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            field: key.into(),
            detail: format!("'{raw}' is not a valid number: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ProvisionConfig::from_properties(&HashMap::new(), Path::new("/data")).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.user_store, UserStoreTarget::Primary);
        assert_eq!(config.tenant_domain, "carbon.super");
        assert_eq!(config.rows_per_fetch, 100);
        assert_eq!(config.thread_pool_size, 4);
        assert_eq!(config.secondary_wait, Duration::from_millis(30_000));
        assert_eq!(config.username_field, "username");
        assert_eq!(config.password_field, "password");
        assert!(config.role_field.is_none());
        assert!(config.claims.is_empty());
        assert_eq!(config.csv_dir, PathBuf::from("/data"));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let p = props(&[
            (KEY_TENANT_DOMAIN, "   "),
            (KEY_ROWS_PER_FETCH, ""),
            (KEY_USERNAME_FIELD, " "),
        ]);
        let config = ProvisionConfig::from_properties(&p, Path::new(".")).unwrap();
        assert_eq!(config.tenant_domain, "carbon.super");
        assert_eq!(config.rows_per_fetch, 100);
        assert_eq!(config.username_field, "username");
    }

    #[test]
    fn test_full_config() {
        let p = props(&[
            (KEY_IS_ENABLED, "TRUE"),
            (KEY_IS_PRIMARY_USER_STORE, "false"),
            (KEY_SECONDARY_USER_STORE_DOMAIN, " LDAP "),
            (KEY_SECONDARY_WAIT, "500"),
            (KEY_ROWS_PER_FETCH, "10"),
            (KEY_THREAD_POOL_SIZE, "2"),
            (KEY_TENANT_DOMAIN, "acme.com"),
            (KEY_USERNAME_FIELD, "user"),
            (KEY_PASSWORD_FIELD, "pass"),
            (KEY_ROLE_FIELD_EXIST, "true"),
            (KEY_ROLE_FIELD, "group"),
            (KEY_CLAIMS, "dept,http://claim/dept;mail,http://claim/email"),
            (KEY_CSV_DIRECTORY, "csv"),
        ]);
        let config = ProvisionConfig::from_properties(&p, Path::new("/home")).unwrap();
        assert!(config.enabled);
        assert_eq!(
            config.user_store,
            UserStoreTarget::Secondary {
                domain: "LDAP".into()
            }
        );
        assert_eq!(config.secondary_wait, Duration::from_millis(500));
        assert_eq!(config.rows_per_fetch, 10);
        assert_eq!(config.thread_pool_size, 2);
        assert_eq!(config.tenant_domain, "acme.com");
        assert_eq!(config.role_field.as_deref(), Some("group"));
        assert_eq!(config.claims.len(), 2);
        assert_eq!(config.claims.claim_for("mail"), Some("http://claim/email"));
        assert_eq!(config.csv_dir, PathBuf::from("/home/csv"));
    }

    #[test]
    fn test_role_field_defaults_only_when_flag_set() {
        let p = props(&[(KEY_ROLE_FIELD, "group")]);
        let config = ProvisionConfig::from_properties(&p, Path::new(".")).unwrap();
        assert!(!config.role_field_exists());

        let p = props(&[(KEY_ROLE_FIELD_EXIST, "true")]);
        let config = ProvisionConfig::from_properties(&p, Path::new(".")).unwrap();
        assert_eq!(config.role_field.as_deref(), Some("role"));
    }

    #[test]
    fn test_secondary_without_domain_is_rejected() {
        let p = props(&[(KEY_IS_ENABLED, "true"), (KEY_IS_PRIMARY_USER_STORE, "false")]);
        let result = ProvisionConfig::from_properties(&p, Path::new("."));
        assert!(matches!(result, Err(ConfigError::SecondaryDomainMissing)));
    }

    #[test]
    fn test_secondary_domain_ignored_for_primary() {
        let p = props(&[
            (KEY_IS_PRIMARY_USER_STORE, "true"),
            (KEY_SECONDARY_USER_STORE_DOMAIN, "LDAP"),
        ]);
        let config = ProvisionConfig::from_properties(&p, Path::new(".")).unwrap();
        assert_eq!(config.user_store, UserStoreTarget::Primary);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let p = props(&[(KEY_ROWS_PER_FETCH, "lots")]);
        let result = ProvisionConfig::from_properties(&p, Path::new("."));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == KEY_ROWS_PER_FETCH
        ));

        let p = props(&[(KEY_THREAD_POOL_SIZE, "0")]);
        let result = ProvisionConfig::from_properties(&p, Path::new("."));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == KEY_THREAD_POOL_SIZE
        ));
    }

    #[test]
    fn test_zero_secondary_wait_is_accepted() {
        let p = props(&[
            (KEY_IS_PRIMARY_USER_STORE, "false"),
            (KEY_SECONDARY_USER_STORE_DOMAIN, "LDAP"),
            (KEY_SECONDARY_WAIT, "0"),
        ]);
        let config = ProvisionConfig::from_properties(&p, Path::new(".")).unwrap();
        assert_eq!(config.secondary_wait, Duration::ZERO);
    }

    #[test]
    fn test_role_field_must_not_shadow_credentials() {
        for column in ["username", "password"] {
            let p = props(&[
                (KEY_USERNAME_FIELD, "username"),
                (KEY_PASSWORD_FIELD, "password"),
                (KEY_ROLE_FIELD_EXIST, "true"),
                (KEY_ROLE_FIELD, column),
            ]);
            let result = ProvisionConfig::from_properties(&p, Path::new("."));
            assert!(matches!(
                result,
                Err(ConfigError::InvalidValue { ref field, .. }) if field == KEY_ROLE_FIELD
            ));
        }

        // Without roleFieldExist the role column is never read.
        let p = props(&[(KEY_USERNAME_FIELD, "user"), (KEY_ROLE_FIELD, "user")]);
        assert!(ProvisionConfig::from_properties(&p, Path::new(".")).is_ok());
    }

    #[test]
    fn test_claim_table_parsing() {
        let table = ClaimTable::parse("dept,http://claim/dept; country , http://claim/country ;").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.claim_for("dept"), Some("http://claim/dept"));
        assert_eq!(table.claim_for("country"), Some("http://claim/country"));
        assert_eq!(table.claim_for("missing"), None);
    }

    #[test]
    fn test_malformed_claim_entries_are_fatal() {
        assert!(matches!(
            ClaimTable::parse("dept"),
            Err(ConfigError::InvalidClaimMapping { .. })
        ));
        assert!(matches!(
            ClaimTable::parse("dept,http://a,extra"),
            Err(ConfigError::InvalidClaimMapping { .. })
        ));
        assert!(matches!(
            ClaimTable::parse("dept,"),
            Err(ConfigError::InvalidClaimMapping { .. })
        ));
    }

    #[test]
    fn test_parse_properties() {
        let parsed = parse_properties(
            "# comment\n! bang comment\n\nisEnabled = true\ntenantDomain:acme.com\nclaims=a,http://x;b,http://y\nflagOnly\n"
                .as_bytes(),
        )
        .unwrap();
        assert_eq!(parsed["isEnabled"], "true");
        assert_eq!(parsed["tenantDomain"], "acme.com");
        assert_eq!(parsed["claims"], "a,http://x;b,http://y");
        assert_eq!(parsed["flagOnly"], "");
        assert_eq!(parsed.len(), 4);
    }

    #[test]
    fn test_whitespace_separator() {
        let parsed = parse_properties("isEnabled true\nnoOfRowsFetch\t25\n".as_bytes()).unwrap();
        assert_eq!(parsed["isEnabled"], "true");

        let config = ProvisionConfig::from_properties(&parsed, Path::new(".")).unwrap();
        assert!(config.enabled);
        assert_eq!(config.rows_per_fetch, 25);
    }

    #[test]
    fn test_escaped_characters_are_unescaped() {
        let parsed = parse_properties(
            "claims=dept,http\\://claim/dept\ntenant\\ name=a\\=b\nuser=caf\\u00e9\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(parsed["tenant name"], "a=b");
        assert_eq!(parsed["user"], "caf\u{e9}");

        let config = ProvisionConfig::from_properties(&parsed, Path::new(".")).unwrap();
        assert_eq!(config.claims.claim_for("dept"), Some("http://claim/dept"));
    }

    #[test]
    fn test_line_continuation() {
        let parsed = parse_properties(
            "claims=dept,http://claim/dept;\\\n    mail,http://claim/email\nisEnabled=true\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(parsed["claims"], "dept,http://claim/dept;mail,http://claim/email");

        let config = ProvisionConfig::from_properties(&parsed, Path::new(".")).unwrap();
        assert!(config.enabled);
        assert_eq!(config.claims.len(), 2);
        assert_eq!(config.claims.claim_for("mail"), Some("http://claim/email"));
    }

    #[test]
    fn test_byte_order_mark_is_skipped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"isEnabled=true\n");
        let parsed = parse_properties(bytes.as_slice()).unwrap();
        assert_eq!(parsed["isEnabled"], "true");
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "isEnabled=true\nusernameField=user\n").unwrap();

        let config = ProvisionConfig::load_from_file(&path).unwrap();
        assert!(config.enabled);
        assert_eq!(config.username_field, "user");
        assert_eq!(config.csv_dir, dir.path());
    }

    #[test]
    fn test_file_not_found() {
        let result = ProvisionConfig::load_from_file("/nonexistent/bulk.properties");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path(Path::new("/opt/is"));
        assert_eq!(
            path,
            PathBuf::from("/opt/is/migration/bulk-user-provision/bulk-user-provision-config.properties")
        );
    }
}
