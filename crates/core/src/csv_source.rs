//! CSV input: file discovery, header resolution, and row collection.
//!
//! Every `.csv` file directly inside the configured directory is read fully
//! into memory. The first record is the header; the username, password and
//! (optionally) role columns are located in it, and every remaining record
//! is collected into an insertion-ordered, de-duplicated [`RowSet`].

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::config::ProvisionConfig;
use crate::errors::CsvError;

// ---------------------------------------------------------------------------
// File discovery
// ---------------------------------------------------------------------------

/// List the `.csv` files (case-insensitive extension) directly inside `dir`.
///
/// Order is whatever the operating system's directory listing returns.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, CsvError> {
    if !dir.is_dir() {
        return Err(CsvError::DirectoryNotFound(dir.display().to_string()));
    }

    let io_err = |source| CsvError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(CsvError::NoFilesFound(dir.display().to_string()));
    }

    debug!(count = files.len(), dir = %dir.display(), "found CSV files");
    Ok(files)
}

// ---------------------------------------------------------------------------
// Header resolution
// ---------------------------------------------------------------------------

/// A field the job recognizes in the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Username,
    Password,
    Role,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
            Self::Role => write!(f, "role"),
        }
    }
}

/// Positions of the recognized fields in one file's header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndex {
    header: Vec<String>,
    username: usize,
    password: usize,
    role: Option<usize>,
}

impl ColumnIndex {
    /// Scan `header` left to right for the configured field names.
    ///
    /// A recognized field appearing twice is an error, as is a header
    /// without the username or password column. A missing role column is
    /// allowed; rows from such a file carry no role.
    pub fn resolve(
        header: Vec<String>,
        config: &ProvisionConfig,
        file: &str,
    ) -> Result<Self, CsvError> {
        let mut username = None;
        let mut password = None;
        let mut role = None;

        for (idx, cell) in header.iter().enumerate() {
            let (field, slot) = if *cell == config.username_field {
                (Field::Username, &mut username)
            } else if *cell == config.password_field {
                (Field::Password, &mut password)
            } else if config.role_field.as_deref() == Some(cell.as_str()) {
                (Field::Role, &mut role)
            } else {
                continue;
            };

            if slot.is_some() {
                error!(%field, column = %cell, file, "field duplicated in the CSV header, task aborted");
                return Err(CsvError::DuplicateColumn {
                    field: field.to_string(),
                    column: cell.clone(),
                    file: file.to_string(),
                });
            }
            info!(%field, column = %cell, index = idx, file, "field found in the CSV header");
            *slot = Some(idx);
        }

        let missing = |field: Field, column: &str| CsvError::MissingColumn {
            field: field.to_string(),
            column: column.to_string(),
            file: file.to_string(),
        };
        let username = username.ok_or_else(|| missing(Field::Username, &config.username_field))?;
        let password = password.ok_or_else(|| missing(Field::Password, &config.password_field))?;

        if let (Some(role_field), None) = (&config.role_field, role) {
            info!(column = %role_field, file, "role column not present, users will be added without a role");
        }

        Ok(Self {
            header,
            username,
            password,
            role,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn username(&self) -> usize {
        self.username
    }

    pub fn password(&self) -> usize {
        self.password
    }

    pub fn role(&self) -> Option<usize> {
        self.role
    }

    /// Whether `idx` is the username, password or role column.
    pub fn is_reserved(&self, idx: usize) -> bool {
        idx == self.username || idx == self.password || self.role == Some(idx)
    }
}

// ---------------------------------------------------------------------------
// Row collection
// ---------------------------------------------------------------------------

/// Insertion-ordered set of rows; identical rows are kept once.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    rows: Vec<Vec<String>>,
    seen: HashSet<Vec<String>>,
    duplicates: usize,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row; returns `false` (and counts a duplicate) if an identical
    /// row was already added.
    pub fn insert(&mut self, row: Vec<String>) -> bool {
        if self.seen.contains(&row) {
            self.duplicates += 1;
            return false;
        }
        self.seen.insert(row.clone());
        self.rows.push(row);
        true
    }

    pub fn as_slice(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows dropped as duplicates.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// One fully read CSV file.
#[derive(Debug, Clone)]
pub struct CsvFile {
    pub path: PathBuf,
    pub columns: ColumnIndex,
    pub rows: RowSet,
}

/// Read and resolve one CSV file from disk.
pub fn read_csv_file(path: &Path, config: &ProvisionConfig) -> Result<CsvFile, CsvError> {
    let file = File::open(path).map_err(|source| CsvError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let (columns, rows) = read_csv(BufReader::new(file), config, &path.display().to_string())?;
    Ok(CsvFile {
        path: path.to_path_buf(),
        columns,
        rows,
    })
}

/// Read a CSV stream: resolve the header, then collect the remaining rows.
///
/// Comma delimited, double-quote quoting, no escape character. Records may
/// have more or fewer cells than the header.
pub fn read_csv<R: Read>(
    reader: R,
    config: &ProvisionConfig,
    file: &str,
) -> Result<(ColumnIndex, RowSet), CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(b',')
        .quote(b'"')
        .escape(None)
        .from_reader(reader);

    let parse_err = |source| CsvError::Parse {
        file: file.to_string(),
        source,
    };

    let mut records = reader.records();
    let header: Vec<String> = match records.next() {
        Some(record) => record.map_err(parse_err)?.iter().map(str::to_string).collect(),
        None => Vec::new(),
    };
    let columns = ColumnIndex::resolve(header, config, file)?;

    let mut rows = RowSet::new();
    for record in records {
        let record = record.map_err(parse_err)?;
        rows.insert(record.iter().map(str::to_string).collect());
    }

    info!(
        file,
        rows = rows.len(),
        duplicates = rows.duplicates(),
        "finished reading CSV file"
    );
    Ok((columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProvisionConfig {
        ProvisionConfig {
            username_field: "user".into(),
            password_field: "pass".into(),
            ..Default::default()
        }
    }

    fn header(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_resolve_columns() {
        let columns = ColumnIndex::resolve(header(&["dept", "user", "pass"]), &config(), "a.csv").unwrap();
        assert_eq!(columns.username(), 1);
        assert_eq!(columns.password(), 2);
        assert_eq!(columns.role(), None);
        assert!(columns.is_reserved(1));
        assert!(!columns.is_reserved(0));
    }

    #[test]
    fn test_duplicate_username_column() {
        let result = ColumnIndex::resolve(header(&["user", "user", "pass"]), &config(), "a.csv");
        assert!(matches!(
            result,
            Err(CsvError::DuplicateColumn { ref field, .. }) if field == "username"
        ));
    }

    #[test]
    fn test_duplicate_role_column() {
        let mut config = config();
        config.role_field = Some("role".into());
        let result = ColumnIndex::resolve(header(&["user", "role", "pass", "role"]), &config, "a.csv");
        assert!(matches!(
            result,
            Err(CsvError::DuplicateColumn { ref field, .. }) if field == "role"
        ));
    }

    #[test]
    fn test_role_column_ignored_without_flag() {
        let columns =
            ColumnIndex::resolve(header(&["user", "pass", "role", "role"]), &config(), "a.csv").unwrap();
        assert_eq!(columns.role(), None);
    }

    #[test]
    fn test_header_match_is_case_sensitive() {
        let result = ColumnIndex::resolve(header(&["User", "pass"]), &config(), "a.csv");
        assert!(matches!(
            result,
            Err(CsvError::MissingColumn { ref field, .. }) if field == "username"
        ));
    }

    #[test]
    fn test_missing_password_column() {
        let result = ColumnIndex::resolve(header(&["user", "dept"]), &config(), "a.csv");
        assert!(matches!(
            result,
            Err(CsvError::MissingColumn { ref field, .. }) if field == "password"
        ));
    }

    #[test]
    fn test_row_set_drops_exact_duplicates_only() {
        let mut rows = RowSet::new();
        assert!(rows.insert(header(&["alice", "pw1", "eng"])));
        assert!(rows.insert(header(&["bob", "pw2", "sales"])));
        assert!(!rows.insert(header(&["alice", "pw1", "eng"])));
        assert!(rows.insert(header(&["alice", "pw1", "ops"])));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.duplicates(), 1);
        assert_eq!(rows.as_slice()[0][0], "alice");
        assert_eq!(rows.as_slice()[2][2], "ops");
    }

    #[test]
    fn test_read_csv_with_quotes_and_short_rows() {
        let data = "user,pass,dept\nalice,pw1,\"eng, platform\"\nbob,pw2\n\"carol\",\"p\"\"w\",ops\n";
        let (columns, rows) = read_csv(data.as_bytes(), &config(), "inline").unwrap();
        assert_eq!(columns.header(), ["user", "pass", "dept"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.as_slice()[0][2], "eng, platform");
        assert_eq!(rows.as_slice()[1].len(), 2);
        assert_eq!(rows.as_slice()[2][1], "p\"w");
    }

    #[test]
    fn test_read_empty_stream_reports_missing_username() {
        let result = read_csv("".as_bytes(), &config(), "empty.csv");
        assert!(matches!(result, Err(CsvError::MissingColumn { .. })));
    }

    #[test]
    fn test_list_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "user,pass\n").unwrap();
        std::fs::write(dir.path().join("b.CSV"), "user,pass\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore").unwrap();
        std::fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let mut files = list_csv_files(dir.path()).unwrap();
        files.sort();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.CSV"]);
    }

    #[test]
    fn test_list_csv_files_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            list_csv_files(dir.path()),
            Err(CsvError::NoFilesFound(_))
        ));
        assert!(matches!(
            list_csv_files(&dir.path().join("missing")),
            Err(CsvError::DirectoryNotFound(_))
        ));
    }
}
