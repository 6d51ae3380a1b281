//! SQLite storage implementation

use super::schema;
use crate::language::{count_lines, detect_language, extract_line_range};
use crate::remote::RepoMetadata;
use crate::symbol::{ExtractedSymbol, Symbol, SymbolKind};
use crate::tokens::estimate_tokens;
use crate::{Error, RepoId, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed index of repositories, files and symbols
///
/// The connection sits behind a mutex so one store can be shared (via `Arc`)
/// between the sync workers and the query layer.
pub struct IndexStore {
    conn: Mutex<Connection>,
}

/// A repository row
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub last_revision: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Repository {
    pub fn repo_id(&self) -> RepoId {
        RepoId::new(&self.owner, &self.name)
    }
}

/// A file row, including its full text
#[derive(Debug, Clone, Serialize)]
pub struct IndexedFile {
    pub id: i64,
    pub repo_id: i64,
    pub path: String,
    pub content: String,
    pub language: String,
    pub line_count: usize,
    pub token_count: usize,
    pub content_id: String,
    pub extractor: String,
    pub updated_at: DateTime<Utc>,
}

/// File listing entry (no content)
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub language: String,
    pub line_count: usize,
    pub token_count: usize,
    pub symbol_count: usize,
}

/// Everything needed to (re)write one file and its symbols.
#[derive(Debug, Clone)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub language: &'static str,
    pub line_count: usize,
    pub token_count: usize,
    pub content_id: String,
    pub extractor: String,
    pub symbols: Vec<ExtractedSymbol>,
}

impl FileWrite {
    /// Derive language, line count and token cost from the content.
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        content_id: impl Into<String>,
        extractor: impl Into<String>,
        symbols: Vec<ExtractedSymbol>,
    ) -> Self {
        let path = path.into();
        let content = content.into();
        Self {
            language: detect_language(&path),
            line_count: count_lines(&content),
            token_count: estimate_tokens(&content),
            path,
            content,
            content_id: content_id.into(),
            extractor: extractor.into(),
            symbols,
        }
    }
}

/// Result of a conditional file write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored content id and extractor already matched; nothing was written
    Unchanged,
    Written { file_id: i64, symbols: usize },
}

/// A sync lease row
#[derive(Debug, Clone, Serialize)]
pub struct Lease {
    pub repo_key: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

const FILE_COLUMNS: &str =
    "id, repo_id, path, content, language, line_count, token_count, content_id, extractor, updated_at";

const SYMBOL_COLUMNS: &str =
    "id, file_id, name, kind, start_line, end_line, signature, token_count, parent";

const REPO_COLUMNS: &str =
    "id, owner, name, full_name, description, language, last_revision, last_synced_at";

impl IndexStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::PRAGMAS)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Lock)
    }

    // ========== Repository Operations ==========

    /// Get a repository by identity
    pub fn get_repo(&self, repo: &RepoId) -> Result<Option<Repository>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM repos WHERE full_name = ?1", REPO_COLUMNS),
            [repo.full_name()],
            row_to_repo,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Insert a repository if it is not known yet, and return the stored row
    pub fn insert_repo(&self, repo: &RepoId, metadata: &RepoMetadata) -> Result<Repository> {
        {
            let conn = self.conn()?;
            conn.execute(
                r#"
                INSERT INTO repos (owner, name, full_name, description, language)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(full_name) DO NOTHING
                "#,
                params![
                    repo.owner,
                    repo.name,
                    repo.full_name(),
                    metadata.description,
                    metadata.language,
                ],
            )?;
        }
        self.get_repo(repo)?
            .ok_or_else(|| Error::RepoNotFound(repo.full_name()))
    }

    /// All repositories, ordered by name
    pub fn list_repos(&self) -> Result<Vec<Repository>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM repos ORDER BY full_name",
            REPO_COLUMNS
        ))?;
        let repos = stmt
            .query_map([], row_to_repo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(repos)
    }

    /// Record a finished sync. `revision` of `None` only bumps the timestamp.
    pub fn record_sync(&self, repo_id: i64, revision: Option<&str>, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        match revision {
            Some(rev) => conn.execute(
                "UPDATE repos SET last_revision = ?1, last_synced_at = ?2 WHERE id = ?3",
                params![rev, timestamp(at), repo_id],
            )?,
            None => conn.execute(
                "UPDATE repos SET last_synced_at = ?1 WHERE id = ?2",
                params![timestamp(at), repo_id],
            )?,
        };
        Ok(())
    }

    // ========== File Operations ==========

    /// Number of indexed files in a repository
    pub fn count_files(&self, repo_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE repo_id = ?1",
            [repo_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get a file by path
    pub fn get_file(&self, repo_id: i64, path: &str) -> Result<Option<IndexedFile>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM files WHERE repo_id = ?1 AND path = ?2", FILE_COLUMNS),
            params![repo_id, path],
            row_to_file,
        )
        .optional()
        .map_err(Into::into)
    }

    /// List files of a repository without their content
    pub fn list_files(&self, repo_id: i64) -> Result<Vec<FileSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT f.path, f.language, f.line_count, f.token_count, COUNT(s.id)
            FROM files f LEFT JOIN symbols s ON s.file_id = f.id
            WHERE f.repo_id = ?1
            GROUP BY f.id
            ORDER BY f.path
            "#,
        )?;
        let files = stmt
            .query_map([repo_id], |row| {
                Ok(FileSummary {
                    path: row.get(0)?,
                    language: row.get(1)?,
                    line_count: row.get::<_, i64>(2)? as usize,
                    token_count: row.get::<_, i64>(3)? as usize,
                    symbol_count: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Whether the stored row for `path` already reflects `content_id` under `extractor`
    pub fn file_is_current(&self, repo_id: i64, path: &str, content_id: &str, extractor: &str) -> Result<bool> {
        let conn = self.conn()?;
        let current = conn
            .query_row(
                "SELECT 1 FROM files WHERE repo_id = ?1 AND path = ?2 AND content_id = ?3 AND extractor = ?4",
                params![repo_id, path, content_id, extractor],
                |_| Ok(()),
            )
            .optional()?;
        Ok(current.is_some())
    }

    /// Upsert a file and replace its symbols, unless it is already current.
    ///
    /// The content-id check, the upsert and the symbol replacement run in one
    /// transaction, so two writers racing on the same path cannot interleave.
    pub fn write_file(&self, repo_id: i64, file: &FileWrite, force: bool) -> Result<WriteOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if !force {
            let existing: Option<(String, String)> = tx
                .query_row(
                    "SELECT content_id, extractor FROM files WHERE repo_id = ?1 AND path = ?2",
                    params![repo_id, file.path],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if existing.is_some_and(|(cid, ext)| cid == file.content_id && ext == file.extractor) {
                return Ok(WriteOutcome::Unchanged);
            }
        }

        tx.execute(
            r#"
            INSERT INTO files (repo_id, path, content, language, line_count, token_count, content_id, extractor, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(repo_id, path) DO UPDATE SET
                content = excluded.content,
                language = excluded.language,
                line_count = excluded.line_count,
                token_count = excluded.token_count,
                content_id = excluded.content_id,
                extractor = excluded.extractor,
                updated_at = excluded.updated_at
            "#,
            params![
                repo_id,
                file.path,
                file.content,
                file.language,
                file.line_count as i64,
                file.token_count as i64,
                file.content_id,
                file.extractor,
                timestamp(Utc::now()),
            ],
        )?;

        let file_id: i64 = tx.query_row(
            "SELECT id FROM files WHERE repo_id = ?1 AND path = ?2",
            params![repo_id, file.path],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM symbols WHERE file_id = ?1", [file_id])?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO symbols (file_id, name, kind, start_line, end_line, signature, token_count, parent)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for symbol in &file.symbols {
                if symbol.start_line < 1
                    || symbol.start_line > symbol.end_line
                    || symbol.end_line > file.line_count
                {
                    continue;
                }
                let body = extract_line_range(&file.content, symbol.start_line, symbol.end_line);
                stmt.execute(params![
                    file_id,
                    symbol.name,
                    symbol.kind.as_str(),
                    symbol.start_line as i64,
                    symbol.end_line as i64,
                    symbol.signature,
                    estimate_tokens(&body) as i64,
                    symbol.parent,
                ])?;
                inserted += 1;
            }
        }

        tx.commit()?;
        Ok(WriteOutcome::Written {
            file_id,
            symbols: inserted,
        })
    }

    /// Delete a file; its symbols go with it. Returns whether a row existed.
    pub fn delete_file(&self, repo_id: i64, path: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM files WHERE repo_id = ?1 AND path = ?2",
            params![repo_id, path],
        )?;
        Ok(deleted > 0)
    }

    // ========== Symbol Operations ==========

    /// All symbols of a file, in line order
    pub fn symbols_in_file(&self, file_id: i64) -> Result<Vec<Symbol>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM symbols WHERE file_id = ?1 ORDER BY start_line, id",
            SYMBOL_COLUMNS
        ))?;
        let symbols = stmt
            .query_map([file_id], row_to_symbol)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    /// First symbol (by line) named `name` in a file, restricted to `kinds` unless empty
    pub fn find_symbol_in_file(&self, file_id: i64, name: &str, kinds: &[SymbolKind]) -> Result<Option<Symbol>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM symbols WHERE file_id = ?1 AND name = ?2 ORDER BY start_line, id",
            SYMBOL_COLUMNS
        ))?;
        let candidates = stmt
            .query_map(params![file_id, name], row_to_symbol)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates
            .into_iter()
            .find(|s| kinds.is_empty() || kinds.contains(&s.kind)))
    }

    /// Symbols of a repository whose name contains `query`, ignoring ASCII
    /// case, optionally of one kind. Paired with their file's path, ordered
    /// by path then line.
    pub fn search_symbols(
        &self,
        repo_id: i64,
        query: &str,
        kind: Option<SymbolKind>,
        limit: usize,
    ) -> Result<Vec<(String, Symbol)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id, s.file_id, s.name, s.kind, s.start_line, s.end_line,
                   s.signature, s.token_count, s.parent, f.path
            FROM symbols s
            JOIN files f ON f.id = s.file_id
            WHERE f.repo_id = ?1
              AND s.name LIKE ?2 ESCAPE '\'
              AND (?3 IS NULL OR s.kind = ?3)
            ORDER BY f.path, s.start_line, s.id
            LIMIT ?4
            "#,
        )?;
        let pattern = format!("%{}%", escape_like(query));
        let found = stmt
            .query_map(
                params![repo_id, pattern, kind.map(|k| k.as_str()), limit as i64],
                |row| Ok((row.get::<_, String>(9)?, row_to_symbol(row)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(found)
    }

    /// Count all symbols
    pub fn count_symbols(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== Lease Operations ==========

    /// Take the sync lease for `repo_key` if it is free or expired.
    /// Not re-entrant: a live lease refuses every holder, including its own.
    pub fn try_acquire_lease(&self, repo_key: &str, holder: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            INSERT INTO sync_leases (repo_key, holder, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(repo_key) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE sync_leases.expires_at <= excluded.acquired_at
            "#,
            params![repo_key, holder, timestamp(now), timestamp(expires_at)],
        )?;
        Ok(changed == 1)
    }

    /// Extend a held lease. Returns false if the lease was lost.
    pub fn renew_lease(&self, repo_key: &str, holder: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_leases SET expires_at = ?1 WHERE repo_key = ?2 AND holder = ?3",
            params![timestamp(expires_at), repo_key, holder],
        )?;
        Ok(changed == 1)
    }

    /// Drop a held lease
    pub fn release_lease(&self, repo_key: &str, holder: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM sync_leases WHERE repo_key = ?1 AND holder = ?2",
            params![repo_key, holder],
        )?;
        Ok(())
    }

    /// Current lease row, expired or not
    pub fn get_lease(&self, repo_key: &str) -> Result<Option<Lease>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT repo_key, holder, acquired_at, expires_at FROM sync_leases WHERE repo_key = ?1",
            [repo_key],
            |row| {
                let acquired: String = row.get(2)?;
                let expires: String = row.get(3)?;
                Ok(Lease {
                    repo_key: row.get(0)?,
                    holder: row.get(1)?,
                    acquired_at: parse_timestamp(2, &acquired)?,
                    expires_at: parse_timestamp(3, &expires)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    // ========== Statistics ==========

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(DbStats {
            repos: count("SELECT COUNT(*) FROM repos")?,
            files: count("SELECT COUNT(*) FROM files")?,
            symbols: count("SELECT COUNT(*) FROM symbols")?,
            tokens: count("SELECT COALESCE(SUM(token_count), 0) FROM files")?,
            active_leases: count("SELECT COUNT(*) FROM sync_leases")?,
        })
    }
}

fn row_to_repo(row: &rusqlite::Row) -> rusqlite::Result<Repository> {
    let synced: Option<String> = row.get(7)?;
    Ok(Repository {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        full_name: row.get(3)?,
        description: row.get(4)?,
        language: row.get(5)?,
        last_revision: row.get(6)?,
        last_synced_at: synced.map(|s| parse_timestamp(7, &s)).transpose()?,
    })
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<IndexedFile> {
    let updated: String = row.get(9)?;
    Ok(IndexedFile {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        path: row.get(2)?,
        content: row.get(3)?,
        language: row.get(4)?,
        line_count: row.get::<_, i64>(5)? as usize,
        token_count: row.get::<_, i64>(6)? as usize,
        content_id: row.get(7)?,
        extractor: row.get(8)?,
        updated_at: parse_timestamp(9, &updated)?,
    })
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn row_to_symbol(row: &rusqlite::Row) -> rusqlite::Result<Symbol> {
    let kind_str: String = row.get(3)?;
    let kind: SymbolKind = kind_str.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Symbol {
        id: row.get(0)?,
        file_id: row.get(1)?,
        name: row.get(2)?,
        kind,
        start_line: row.get::<_, i64>(4)? as usize,
        end_line: row.get::<_, i64>(5)? as usize,
        signature: row.get(6)?,
        token_count: row.get::<_, i64>(7)? as usize,
        parent: row.get(8)?,
    })
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub repos: usize,
    pub files: usize,
    pub symbols: usize,
    pub tokens: usize,
    pub active_leases: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Repositories: {}", self.repos)?;
        writeln!(f, "  Files: {}", self.files)?;
        writeln!(f, "  Symbols: {}", self.symbols)?;
        writeln!(f, "  Tokens: {}", self.tokens)?;
        writeln!(f, "  Active leases: {}", self.active_leases)
    }
}
