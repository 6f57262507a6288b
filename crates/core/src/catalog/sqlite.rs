//! SQLite-backed catalog store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    sort_title, CatalogError, CatalogItem, CatalogStats, CatalogStore, FileRef, SourceFileFilter,
};
use crate::classifier::{ClassificationMethod, ClassificationResult};
use crate::enricher::MergedMetadata;
use crate::identifier::Identifier;
use crate::inspector::{BookFormat, Checksums, ExtractedMetadata, SeriesInfo, SourceFile, SourceStatus};

const SOURCE_FILE_COLUMNS: &str = "id, path, sha256, md5, format, size_bytes, extracted, identifier, \
     status, error, item_id, placed_path, created_at, updated_at, duplicate_of";

const ITEM_COLUMNS: &str = "id, title, sort_title, series_name, series_index, classification, \
     classification_method, confidence, fiction, publisher, publish_date, description, language, \
     identifiers, subjects, cover_ref, created_at, updated_at";

/// SQLite-backed catalog. Also hosts the review queue tables.
pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn new(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CatalogError::Database(format!("{}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and dry runs.
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn
            .lock()
            .map_err(|_| CatalogError::Database("connection mutex poisoned".to_string()))
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Filed books
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                sort_title TEXT NOT NULL,
                series_name TEXT,
                series_index REAL,
                classification TEXT,
                classification_method TEXT NOT NULL,
                confidence REAL NOT NULL,
                fiction INTEGER NOT NULL DEFAULT 0,
                publisher TEXT,
                publish_date TEXT,
                description TEXT,
                language TEXT,
                isbn13 TEXT,
                isbn10 TEXT,
                identifiers TEXT NOT NULL DEFAULT '{}',
                subjects TEXT NOT NULL DEFAULT '[]',
                cover_ref TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_isbn13 ON items(isbn13);
            CREATE INDEX IF NOT EXISTS idx_items_isbn10 ON items(isbn10);
            CREATE INDEX IF NOT EXISTS idx_items_title ON items(title COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS item_authors (
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (item_id, position)
            );

            -- Physical files; one checksum, one library file
            CREATE TABLE IF NOT EXISTS item_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                path TEXT NOT NULL UNIQUE,
                format TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                sha256 TEXT NOT NULL UNIQUE,
                md5 TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_item_files_item ON item_files(item_id);

            -- Every intake file ever inspected
            CREATE TABLE IF NOT EXISTS source_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                md5 TEXT NOT NULL,
                format TEXT,
                size_bytes INTEGER NOT NULL,
                extracted TEXT NOT NULL,
                identifier TEXT,
                status TEXT NOT NULL,
                error TEXT,
                item_id INTEGER REFERENCES items(id),
                placed_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                duplicate_of INTEGER REFERENCES source_files(id),
                UNIQUE(path, sha256)
            );

            CREATE INDEX IF NOT EXISTS idx_source_files_status ON source_files(status);
            CREATE INDEX IF NOT EXISTS idx_source_files_sha256 ON source_files(sha256);

            -- Review queue
            CREATE TABLE IF NOT EXISTS review_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_file_id INTEGER NOT NULL REFERENCES source_files(id),
                state TEXT NOT NULL,
                reason TEXT NOT NULL,
                merged TEXT NOT NULL,
                hints TEXT NOT NULL,
                classification TEXT NOT NULL,
                note TEXT,
                item_id INTEGER REFERENCES items(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_review_entries_source ON review_entries(source_file_id);
            CREATE INDEX IF NOT EXISTS idx_review_entries_state ON review_entries(state);
            "#,
        )?;

        Ok(())
    }

    fn row_to_source_file(row: &rusqlite::Row) -> rusqlite::Result<SourceFile> {
        let path: String = row.get(1)?;
        let format: Option<String> = row.get(4)?;
        let size_bytes: i64 = row.get(5)?;
        let extracted_json: String = row.get(6)?;
        let identifier_json: Option<String> = row.get(7)?;
        let status_str: String = row.get(8)?;
        let placed_path: Option<String> = row.get(11)?;
        let created_at_str: String = row.get(12)?;
        let updated_at_str: String = row.get(13)?;

        let extracted: ExtractedMetadata =
            serde_json::from_str(&extracted_json).unwrap_or_default();
        let identifier: Option<Identifier> =
            identifier_json.and_then(|json| serde_json::from_str(&json).ok());

        Ok(SourceFile {
            id: Some(row.get(0)?),
            path: PathBuf::from(path),
            checksums: Checksums {
                sha256: row.get(2)?,
                md5: row.get(3)?,
            },
            format: format.as_deref().and_then(BookFormat::parse),
            size_bytes: size_bytes.max(0) as u64,
            extracted,
            identifier,
            status: SourceStatus::parse(&status_str).unwrap_or(SourceStatus::Pending),
            error: row.get(9)?,
            item_id: row.get(10)?,
            placed_path: placed_path.map(PathBuf::from),
            duplicate_of: row.get(14)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<CatalogItem> {
        let series_name: Option<String> = row.get(3)?;
        let series_index: Option<f64> = row.get(4)?;
        let method_str: String = row.get(6)?;
        let confidence: f64 = row.get(7)?;
        let fiction: i64 = row.get(8)?;
        let identifiers_json: String = row.get(13)?;
        let subjects_json: String = row.get(14)?;
        let created_at_str: String = row.get(16)?;
        let updated_at_str: String = row.get(17)?;

        Ok(CatalogItem {
            id: row.get(0)?,
            title: row.get(1)?,
            sort_title: row.get(2)?,
            authors: Vec::new(), // Loaded separately
            series: series_name.map(|name| SeriesInfo::new(name, series_index.map(|i| i as f32))),
            classification: row.get(5)?,
            classification_method: ClassificationMethod::parse(&method_str)
                .unwrap_or(ClassificationMethod::Unclassified),
            confidence: confidence as f32,
            fiction: fiction != 0,
            publisher: row.get(9)?,
            publish_date: row.get(10)?,
            description: row.get(11)?,
            language: row.get(12)?,
            identifiers: serde_json::from_str(&identifiers_json).unwrap_or_default(),
            subjects: serde_json::from_str(&subjects_json).unwrap_or_default(),
            cover_ref: row.get(15)?,
            files: Vec::new(), // Loaded separately
            source_file_ids: Vec::new(),
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn load_item(conn: &Connection, id: i64) -> Result<Option<CatalogItem>, CatalogError> {
        let sql = format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS);
        let Some(mut item) = conn
            .query_row(&sql, params![id], Self::row_to_item)
            .optional()?
        else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT name FROM item_authors WHERE item_id = ? ORDER BY position")?;
        let authors = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
        for author in authors {
            item.authors.push(author?);
        }

        let mut stmt = conn.prepare(
            "SELECT path, format, size_bytes, sha256, md5 FROM item_files
             WHERE item_id = ? ORDER BY id",
        )?;
        let files = stmt.query_map(params![id], |row| {
            let format: String = row.get(1)?;
            let size_bytes: i64 = row.get(2)?;
            Ok((row.get::<_, String>(0)?, format, size_bytes, row.get(3)?, row.get(4)?))
        })?;
        for file in files {
            let (path, format, size_bytes, sha256, md5) = file?;
            let Some(format) = BookFormat::parse(&format) else {
                return Err(CatalogError::Database(format!(
                    "item {} file {} has unknown format '{}'",
                    id, path, format
                )));
            };
            item.files.push(FileRef {
                path,
                format,
                size_bytes: size_bytes.max(0) as u64,
                sha256,
                md5,
            });
        }

        let mut stmt = conn.prepare("SELECT id FROM source_files WHERE item_id = ? ORDER BY id")?;
        let sources = stmt.query_map(params![id], |row| row.get::<_, i64>(0))?;
        for source in sources {
            item.source_file_ids.push(source?);
        }

        Ok(Some(item))
    }

    fn insert_file(
        conn: &Connection,
        item_id: i64,
        file: &FileRef,
        now: &str,
    ) -> Result<(), CatalogError> {
        conn.execute(
            "INSERT INTO item_files (item_id, path, format, size_bytes, sha256, md5, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                item_id,
                &file.path,
                file.format.as_str(),
                file.size_bytes as i64,
                &file.sha256,
                &file.md5,
                now,
            ],
        )?;
        Ok(())
    }

    fn build_where_clause(filter: &SourceFileFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(sha256) = &filter.sha256 {
            conditions.push("sha256 = ?");
            params.push(Box::new(sha256.clone()));
        }

        if let Some(format) = filter.format {
            conditions.push("format = ?");
            params.push(Box::new(format.as_str()));
        }

        if let Some(primary) = filter.duplicate_of {
            conditions.push("duplicate_of = ?");
            params.push(Box::new(primary));
        }

        if let Some(in_review) = filter.in_review {
            let open = "EXISTS (SELECT 1 FROM review_entries r WHERE r.source_file_id = source_files.id
                 AND r.state IN ('pending', 'searching'))";
            conditions.push(if in_review {
                open
            } else {
                "NOT EXISTS (SELECT 1 FROM review_entries r WHERE r.source_file_id = source_files.id
                 AND r.state IN ('pending', 'searching'))"
            });
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl CatalogStore for SqliteCatalogStore {
    fn find_by_checksum(&self, sha256: &str) -> Result<Option<CatalogItem>, CatalogError> {
        let conn = self.lock()?;
        let item_id: Option<i64> = conn
            .query_row(
                "SELECT item_id FROM item_files WHERE sha256 = ?",
                params![sha256],
                |row| row.get(0),
            )
            .optional()?;
        match item_id {
            Some(id) => Self::load_item(&conn, id),
            None => Ok(None),
        }
    }

    fn create_item(
        &self,
        metadata: &MergedMetadata,
        classification: &ClassificationResult,
        file: FileRef,
    ) -> Result<CatalogItem, CatalogError> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let title = metadata
            .title
            .clone()
            .unwrap_or_else(|| "Untitled".to_string());
        let identifiers = serde_json::to_string(&metadata.identifiers)
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        let subjects = serde_json::to_string(&metadata.subjects)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO items (title, sort_title, series_name, series_index, classification,
                classification_method, confidence, fiction, publisher, publish_date, description,
                language, isbn13, isbn10, identifiers, subjects, cover_ref, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                &title,
                sort_title(&title),
                metadata.series.as_ref().map(|s| s.name.clone()),
                metadata.series.as_ref().and_then(|s| s.index).map(|i| i as f64),
                &classification.code,
                classification.method.as_str(),
                classification.confidence as f64,
                classification.family.is_fiction() as i64,
                &metadata.publisher,
                &metadata.publish_date,
                &metadata.description,
                &metadata.language,
                metadata.isbn13(),
                metadata.isbn10(),
                identifiers,
                subjects,
                &metadata.cover_ref,
                &now,
                &now,
            ],
        )?;
        let item_id = tx.last_insert_rowid();

        for (position, author) in metadata.authors.iter().enumerate() {
            tx.execute(
                "INSERT INTO item_authors (item_id, position, name) VALUES (?, ?, ?)",
                params![item_id, position as i64, author],
            )?;
        }
        Self::insert_file(&tx, item_id, &file, &now)?;
        tx.commit()?;

        Self::load_item(&conn, item_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("item {}", item_id)))
    }

    fn attach_file(&self, item_id: i64, file: FileRef) -> Result<CatalogItem, CatalogError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        Self::insert_file(&conn, item_id, &file, &now).map_err(|e| match e {
            // The foreign key fails when the item is gone.
            CatalogError::Conflict(msg) if msg.contains("FOREIGN KEY") => {
                CatalogError::NotFound(format!("item {}", item_id))
            }
            other => other,
        })?;
        conn.execute(
            "UPDATE items SET updated_at = ? WHERE id = ?",
            params![&now, item_id],
        )?;
        Self::load_item(&conn, item_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("item {}", item_id)))
    }

    fn get_item(&self, id: i64) -> Result<Option<CatalogItem>, CatalogError> {
        let conn = self.lock()?;
        Self::load_item(&conn, id)
    }

    fn find_item_by_identifier(&self, isbn: &str) -> Result<Option<CatalogItem>, CatalogError> {
        let conn = self.lock()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM items WHERE isbn13 = ?1 OR isbn10 = ?1 ORDER BY id LIMIT 1",
                params![isbn],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Self::load_item(&conn, id),
            None => Ok(None),
        }
    }

    fn find_item_by_title_author(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<CatalogItem>, CatalogError> {
        let conn = self.lock()?;
        let id: Option<i64> = match author {
            Some(author) => conn
                .query_row(
                    "SELECT i.id FROM items i
                     JOIN item_authors a ON a.item_id = i.id AND a.position = 0
                     WHERE i.title = ?1 COLLATE NOCASE AND a.name = ?2 COLLATE NOCASE
                     ORDER BY i.id LIMIT 1",
                    params![title, author],
                    |row| row.get(0),
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT i.id FROM items i
                     WHERE i.title = ?1 COLLATE NOCASE
                       AND NOT EXISTS (SELECT 1 FROM item_authors a WHERE a.item_id = i.id)
                     ORDER BY i.id LIMIT 1",
                    params![title],
                    |row| row.get(0),
                )
                .optional()?,
        };
        match id {
            Some(id) => Self::load_item(&conn, id),
            None => Ok(None),
        }
    }

    fn record_source_file(&self, file: &SourceFile) -> Result<SourceFile, CatalogError> {
        let conn = self.lock()?;
        let path = file.path.to_string_lossy().to_string();
        let extracted = serde_json::to_string(&file.extracted)
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        let identifier = file
            .identifier
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO source_files (path, sha256, md5, format, size_bytes, extracted, identifier,
                status, error, item_id, placed_path, created_at, updated_at, duplicate_of)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(path, sha256) DO NOTHING",
            params![
                &path,
                &file.checksums.sha256,
                &file.checksums.md5,
                file.format.map(|f| f.as_str()),
                file.size_bytes as i64,
                extracted,
                identifier,
                file.status.as_str(),
                &file.error,
                file.item_id,
                file.placed_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                file.created_at.to_rfc3339(),
                file.updated_at.to_rfc3339(),
                file.duplicate_of,
            ],
        )?;

        let sql = format!(
            "SELECT {} FROM source_files WHERE path = ? AND sha256 = ?",
            SOURCE_FILE_COLUMNS
        );
        let recorded = conn.query_row(
            &sql,
            params![&path, &file.checksums.sha256],
            Self::row_to_source_file,
        )?;
        Ok(recorded)
    }

    fn get_source_file(&self, id: i64) -> Result<Option<SourceFile>, CatalogError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM source_files WHERE id = ?", SOURCE_FILE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_source_file)
            .optional()?)
    }

    fn source_file_by_path(&self, path: &Path) -> Result<Option<SourceFile>, CatalogError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM source_files WHERE path = ? ORDER BY id DESC LIMIT 1",
            SOURCE_FILE_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![path.to_string_lossy().to_string()],
                Self::row_to_source_file,
            )
            .optional()?)
    }

    fn update_source_status(
        &self,
        id: i64,
        status: SourceStatus,
        error: Option<&str>,
        item_id: Option<i64>,
    ) -> Result<(), CatalogError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE source_files SET status = ?, error = ?, item_id = COALESCE(?, item_id),
                updated_at = ? WHERE id = ?",
            params![
                status.as_str(),
                error,
                item_id,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("source file {}", id)));
        }
        Ok(())
    }

    fn set_placed_path(&self, id: i64, placed: Option<&Path>) -> Result<(), CatalogError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE source_files SET placed_path = ?, updated_at = ? WHERE id = ?",
            params![
                placed.map(|p| p.to_string_lossy().to_string()),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("source file {}", id)));
        }
        Ok(())
    }

    fn list_source_files(
        &self,
        filter: &SourceFileFilter,
    ) -> Result<Vec<SourceFile>, CatalogError> {
        let conn = self.lock()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM source_files {} ORDER BY id ASC LIMIT ? OFFSET ?",
            SOURCE_FILE_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_source_file)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    fn update_inspection(&self, id: i64, file: &SourceFile) -> Result<(), CatalogError> {
        let conn = self.lock()?;
        let extracted = serde_json::to_string(&file.extracted)
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        let identifier = file
            .identifier
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        let changed = conn.execute(
            "UPDATE source_files SET sha256 = ?, md5 = ?, format = ?, size_bytes = ?,
                extracted = ?, identifier = ?, status = ?, error = ?, updated_at = ?
             WHERE id = ?",
            params![
                &file.checksums.sha256,
                &file.checksums.md5,
                file.format.map(|f| f.as_str()),
                file.size_bytes as i64,
                extracted,
                identifier,
                file.status.as_str(),
                &file.error,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("source file {}", id)));
        }
        Ok(())
    }

    fn checksums_with_copies(&self) -> Result<Vec<String>, CatalogError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT sha256 FROM source_files
             WHERE status = 'pending' AND sha256 != ''
               AND NOT EXISTS (SELECT 1 FROM review_entries r WHERE r.source_file_id = source_files.id
                 AND r.state IN ('pending', 'searching'))
             GROUP BY sha256 HAVING COUNT(*) > 1
             ORDER BY MIN(id) ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut checksums = Vec::new();
        for row in rows {
            checksums.push(row?);
        }
        Ok(checksums)
    }

    fn mark_duplicate_of(&self, id: i64, primary_id: i64) -> Result<(), CatalogError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE source_files SET status = 'duplicate', duplicate_of = ?, error = NULL,
                updated_at = ? WHERE id = ?",
            params![primary_id, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("source file {}", id)));
        }
        Ok(())
    }

    fn reset_processing(&self) -> Result<usize, CatalogError> {
        let conn = self.lock()?;
        let reset = conn.execute(
            "UPDATE source_files SET status = 'pending', updated_at = ? WHERE status = 'processing'",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(reset)
    }

    fn stats(&self) -> Result<CatalogStats, CatalogError> {
        let conn = self.lock()?;

        let items: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        let (files, total_size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM item_files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut by_status = Vec::new();
        for status in SourceStatus::all() {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM source_files WHERE status = ?",
                params![status.as_str()],
                |row| row.get(0),
            )?;
            by_status.push((status, count.max(0) as u64));
        }

        let mut stmt = conn.prepare(
            "SELECT COALESCE(format, 'unknown') AS f, COUNT(*) FROM source_files
             GROUP BY f ORDER BY COUNT(*) DESC, f ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut by_format = Vec::new();
        for row in rows {
            let (format, count) = row?;
            by_format.push((format, count.max(0) as u64));
        }

        let open_reviews: i64 = conn.query_row(
            "SELECT COUNT(*) FROM review_entries
             WHERE state IN ('pending', 'searching')",
            [],
            |row| row.get(0),
        )?;

        Ok(CatalogStats {
            items: items.max(0) as u64,
            files: files.max(0) as u64,
            total_size_bytes: total_size.max(0) as u64,
            by_status,
            by_format,
            open_reviews: open_reviews.max(0) as u64,
        })
    }
}
