//! Calibre library lookups.
//!
//! Reads the `metadata.db` of an existing Calibre library, read-only. ISBN
//! queries match the identifiers table and the legacy `books.isbn` column
//! with hyphens ignored; title/author queries match by substring. Calibre
//! tags become subjects.

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::{EnrichmentCandidate, LookupQuery, SourceTag};
use super::{MetadataSource, SourceError};
use crate::inspector::SeriesInfo;

const DATABASE_FILE: &str = "metadata.db";

/// Read-only view of a Calibre library.
pub struct CalibreSource {
    database: PathBuf,
}

impl CalibreSource {
    /// `library` is the Calibre library directory holding `metadata.db`.
    pub fn new(library: &Path) -> Self {
        Self {
            database: library.join(DATABASE_FILE),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database
    }

    fn open(&self) -> Result<Option<Connection>, SourceError> {
        if !self.database.exists() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            &self.database,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_error)?;
        Ok(Some(conn))
    }

    fn lookup_blocking(
        &self,
        query: &LookupQuery,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        let Some(conn) = self.open()? else {
            return Ok(None);
        };
        let book_id = match query {
            LookupQuery::Identifier { isbn } => find_by_isbn(&conn, isbn)?,
            LookupQuery::TitleAuthor { title, author } => {
                find_by_title_author(&conn, title, author.as_deref())?
            }
        };
        match book_id {
            Some(id) => Ok(Some(load_book(&conn, id)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MetadataSource for CalibreSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Calibre
    }

    async fn lookup(
        &self,
        query: &LookupQuery,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        debug!("Calibre lookup: {}", query);
        let source = CalibreSource {
            database: self.database.clone(),
        };
        let query = query.clone();
        tokio::task::spawn_blocking(move || source.lookup_blocking(&query))
            .await
            .map_err(|e| SourceError::Database(format!("Calibre lookup task: {}", e)))?
    }
}

fn db_error(e: rusqlite::Error) -> SourceError {
    SourceError::Database(format!("Calibre: {}", e))
}

fn clean_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .collect::<String>()
        .to_ascii_uppercase()
}

fn find_by_isbn(conn: &Connection, isbn: &str) -> Result<Option<i64>, SourceError> {
    let isbn = clean_isbn(isbn);
    let from_identifiers = conn
        .query_row(
            "SELECT book FROM identifiers
             WHERE type = 'isbn' AND REPLACE(REPLACE(UPPER(val), '-', ''), ' ', '') = ?
             ORDER BY book LIMIT 1",
            params![&isbn],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;
    if from_identifiers.is_some() {
        return Ok(from_identifiers);
    }
    conn.query_row(
        "SELECT id FROM books
         WHERE REPLACE(REPLACE(UPPER(COALESCE(isbn, '')), '-', ''), ' ', '') = ?
         ORDER BY id LIMIT 1",
        params![&isbn],
        |row| row.get(0),
    )
    .optional()
    .map_err(db_error)
}

fn find_by_title_author(
    conn: &Connection,
    title: &str,
    author: Option<&str>,
) -> Result<Option<i64>, SourceError> {
    let title = format!("%{}%", title.trim());
    let found = match author {
        Some(author) => conn
            .query_row(
                "SELECT b.id FROM books b
                 JOIN books_authors_link bal ON bal.book = b.id
                 JOIN authors a ON a.id = bal.author
                 WHERE b.title LIKE ? AND a.name LIKE ?
                 ORDER BY b.id LIMIT 1",
                params![&title, format!("%{}%", author.trim())],
                |row| row.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id FROM books WHERE title LIKE ? ORDER BY id LIMIT 1",
                params![&title],
                |row| row.get(0),
            )
            .optional(),
    };
    found.map_err(db_error)
}

fn strings(conn: &Connection, sql: &str, book_id: i64) -> Result<Vec<String>, SourceError> {
    let mut stmt = conn.prepare(sql).map_err(db_error)?;
    let rows = stmt
        .query_map(params![book_id], |row| row.get::<_, String>(0))
        .map_err(db_error)?;
    let mut values = Vec::new();
    for row in rows {
        values.push(row.map_err(db_error)?);
    }
    Ok(values)
}

fn first(conn: &Connection, sql: &str, book_id: i64) -> Result<Option<String>, SourceError> {
    Ok(strings(conn, sql, book_id)?
        .into_iter()
        .find(|v| !v.trim().is_empty()))
}

fn load_book(conn: &Connection, id: i64) -> Result<EnrichmentCandidate, SourceError> {
    let (title, series_index, legacy_isbn, pubdate): (
        String,
        Option<f64>,
        Option<String>,
        Option<String>,
    ) = conn
        .query_row(
            "SELECT title, series_index, isbn, pubdate FROM books WHERE id = ?",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(db_error)?;

    let mut candidate = EnrichmentCandidate::new(SourceTag::Calibre).with_title(title);
    candidate.authors = strings(
        conn,
        "SELECT a.name FROM authors a
         JOIN books_authors_link bal ON bal.author = a.id
         WHERE bal.book = ? ORDER BY bal.id",
        id,
    )?;
    candidate.series = first(
        conn,
        "SELECT s.name FROM series s
         JOIN books_series_link bsl ON bsl.series = s.id WHERE bsl.book = ?",
        id,
    )?
    .map(|name| SeriesInfo::new(name, series_index.map(|i| i as f32)));
    candidate.publisher = first(
        conn,
        "SELECT p.name FROM publishers p
         JOIN books_publishers_link bpl ON bpl.publisher = p.id WHERE bpl.book = ?",
        id,
    )?;
    candidate.subjects = strings(
        conn,
        "SELECT t.name FROM tags t
         JOIN books_tags_link btl ON btl.tag = t.id WHERE btl.book = ?",
        id,
    )?;
    candidate.description = first(conn, "SELECT text FROM comments WHERE book = ?", id)?;
    candidate.language = first(
        conn,
        "SELECT l.lang_code FROM languages l
         JOIN books_languages_link bll ON bll.lang_code = l.id WHERE bll.book = ?",
        id,
    )?;
    // Calibre stores an unknown date as year 101.
    candidate.publish_date = pubdate
        .filter(|d| !d.starts_with("0101"))
        .and_then(|d| d.get(..10).map(str::to_string));

    let mut stmt = conn
        .prepare("SELECT type, val FROM identifiers WHERE book = ?")
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(db_error)?;
    let mut isbns: Vec<String> = legacy_isbn.into_iter().collect();
    for row in rows {
        let (scheme, value) = row.map_err(db_error)?;
        if scheme == "isbn" {
            isbns.push(value);
        } else {
            candidate.identifiers.insert(scheme, value);
        }
    }
    for isbn in isbns {
        if let Some(isbn) = crate::identifier::isbn::normalize(&isbn) {
            let scheme = if isbn.len() == 13 { "isbn_13" } else { "isbn_10" };
            candidate.identifiers.entry(scheme.to_string()).or_insert(isbn);
        }
    }
    candidate
        .identifiers
        .insert("calibre".to_string(), id.to_string());
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// The parts of Calibre's schema the lookups read.
    const SCHEMA: &str = r#"
        CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT NOT NULL, series_index REAL,
            isbn TEXT DEFAULT '', pubdate TEXT, path TEXT);
        CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE books_authors_link (id INTEGER PRIMARY KEY, book INTEGER, author INTEGER);
        CREATE TABLE series (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE books_series_link (id INTEGER PRIMARY KEY, book INTEGER, series INTEGER);
        CREATE TABLE publishers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE books_publishers_link (id INTEGER PRIMARY KEY, book INTEGER, publisher INTEGER);
        CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE books_tags_link (id INTEGER PRIMARY KEY, book INTEGER, tag INTEGER);
        CREATE TABLE comments (id INTEGER PRIMARY KEY, book INTEGER, text TEXT);
        CREATE TABLE languages (id INTEGER PRIMARY KEY, lang_code TEXT NOT NULL);
        CREATE TABLE books_languages_link (id INTEGER PRIMARY KEY, book INTEGER, lang_code INTEGER);
        CREATE TABLE identifiers (id INTEGER PRIMARY KEY, book INTEGER, type TEXT, val TEXT);

        INSERT INTO books VALUES (1, 'Guards! Guards!', 8.0, '', '1989-11-01T00:00:00+00:00', 'Terry Pratchett/Guards! Guards! (1)');
        INSERT INTO books VALUES (2, 'Unsorted Notes', 1.0, '978-0-13-235088-4', '0101-01-01T00:00:00+00:00', 'Unknown/Unsorted Notes (2)');
        INSERT INTO authors VALUES (1, 'Terry Pratchett');
        INSERT INTO books_authors_link VALUES (1, 1, 1);
        INSERT INTO series VALUES (1, 'Discworld');
        INSERT INTO books_series_link VALUES (1, 1, 1);
        INSERT INTO publishers VALUES (1, 'Gollancz');
        INSERT INTO books_publishers_link VALUES (1, 1, 1);
        INSERT INTO tags VALUES (1, 'Fantasy'), (2, 'Humor');
        INSERT INTO books_tags_link VALUES (1, 1, 1), (2, 1, 2);
        INSERT INTO comments VALUES (1, 1, 'The city watch and a dragon.');
        INSERT INTO languages VALUES (1, 'eng');
        INSERT INTO books_languages_link VALUES (1, 1, 1);
        INSERT INTO identifiers VALUES (1, 1, 'isbn', '0-575-04606-6'), (2, 1, 'goodreads', '64216');
    "#;

    fn library() -> (TempDir, CalibreSource) {
        let temp = TempDir::new().unwrap();
        let conn = Connection::open(temp.path().join(DATABASE_FILE)).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let source = CalibreSource::new(temp.path());
        (temp, source)
    }

    #[tokio::test]
    async fn test_isbn_lookup_reads_full_record() {
        let (_temp, calibre) = library();
        let candidate = calibre
            .lookup(&LookupQuery::isbn("0575046066"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(candidate.source, SourceTag::Calibre);
        assert_eq!(candidate.title.as_deref(), Some("Guards! Guards!"));
        assert_eq!(candidate.authors, vec!["Terry Pratchett"]);
        assert_eq!(candidate.series, Some(SeriesInfo::new("Discworld", Some(8.0))));
        assert_eq!(candidate.publisher.as_deref(), Some("Gollancz"));
        assert_eq!(candidate.subjects, vec!["Fantasy", "Humor"]);
        assert_eq!(candidate.language.as_deref(), Some("eng"));
        assert_eq!(candidate.publish_date.as_deref(), Some("1989-11-01"));
        assert_eq!(
            candidate.identifiers.get("isbn_10").map(String::as_str),
            Some("0575046066")
        );
        assert_eq!(
            candidate.identifiers.get("goodreads").map(String::as_str),
            Some("64216")
        );
    }

    #[tokio::test]
    async fn test_legacy_isbn_column_and_unknown_date() {
        let (_temp, calibre) = library();
        let candidate = calibre
            .lookup(&LookupQuery::isbn("9780132350884"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.title.as_deref(), Some("Unsorted Notes"));
        assert_eq!(candidate.publish_date, None);
        assert_eq!(candidate.series, None);
        assert_eq!(
            candidate.identifiers.get("isbn_13").map(String::as_str),
            Some("9780132350884")
        );
    }

    #[tokio::test]
    async fn test_title_author_lookup() {
        let (_temp, calibre) = library();
        let hit = calibre
            .lookup(&LookupQuery::title_author(
                "guards",
                Some("Pratchett".to_string()),
            ))
            .await
            .unwrap();
        assert!(hit.is_some());

        let miss = calibre
            .lookup(&LookupQuery::title_author(
                "guards",
                Some("Tolkien".to_string()),
            ))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_missing_database_finds_nothing() {
        let temp = TempDir::new().unwrap();
        let calibre = CalibreSource::new(&temp.path().join("nowhere"));
        assert!(calibre
            .lookup(&LookupQuery::isbn("9780132350884"))
            .await
            .unwrap()
            .is_none());
    }
}
