//! Database schema definitions

/// Connection pragmas applied on every open
pub const PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

/// SQL to create the repos table
pub const CREATE_REPOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS repos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL UNIQUE,
    description TEXT,
    language TEXT,
    last_revision TEXT,
    last_synced_at TEXT
)
"#;

/// SQL to create the files table
///
/// `(repo_id, path)` is the upsert key. `content_id` is the remote host's
/// content-identity marker; `extractor` tags the extractor that produced
/// the file's symbol rows.
pub const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    language TEXT NOT NULL,
    line_count INTEGER NOT NULL,
    token_count INTEGER NOT NULL,
    content_id TEXT NOT NULL,
    extractor TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(repo_id, path)
)
"#;

/// SQL to create the symbols table
pub const CREATE_SYMBOLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    signature TEXT,
    token_count INTEGER NOT NULL,
    parent TEXT,
    CHECK (start_line >= 1 AND start_line <= end_line)
)
"#;

/// SQL to create the sync_leases table
/// One row per repository while a sync holds it.
pub const CREATE_SYNC_LEASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_leases (
    repo_key TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_files_repo ON files(repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_REPOS_TABLE,
        CREATE_FILES_TABLE,
        CREATE_SYMBOLS_TABLE,
        CREATE_SYNC_LEASES_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
