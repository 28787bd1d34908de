//! SQLite-backed entry store
//!
//! This module provides the persistent store that:
//! - Keeps owners and their entries as structural columns plus a JSON payload
//! - Holds the tag catalog and the entry/tag relation table
//! - Holds translation groups (stable entries) and their language links
//!
//! The store assumes one writing process at a time. SQLite's file locking is
//! the only concurrency control; readers that hit a busy database should go
//! through [`retry_on_busy`].
//!
//! Relation rows and payload tag fields are only written by
//! [`crate::core::tags`]; other modules call into it rather than touching
//! `entry_tags` directly.

mod schema;
mod types;

pub use types::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::{StoreError, StoreResult};
use crate::core::project::Project;
use crate::core::sections::TAG_FIELD;

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Columns selected for [`Entry`] rows, in `entry_from_row` order
pub(crate) const ENTRY_COLUMNS: &str = "e.id, e.owner_id, o.slug, e.section, e.kind, \
     e.order_index, e.payload, e.identity_key, e.created_at, e.updated_at, e.original_tags";

/// The entry store backed by SQLite
pub struct CvStore {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl CvStore {
    /// Open or create the store of a project
    pub fn open_project(project: &Project) -> StoreResult<Self> {
        Self::open(&project.store_path())
    }

    /// Open or create a store file
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let mut store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.configure()?;
        store.init_schema()?;
        debug!(path = %path.display(), "opened store");
        Ok(store)
    }

    /// Open a private in-memory store (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.configure()?;
        store.init_schema()?;
        Ok(store)
    }

    fn configure(&mut self) -> StoreResult<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Path of the store file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // Owners
    // =========================================================================

    /// Get an owner by slug
    pub fn get_owner(&self, slug: &str) -> StoreResult<Owner> {
        find_owner(&self.conn, slug)?.ok_or_else(|| StoreError::not_found("owner", slug))
    }

    /// List owners with their entry counts
    pub fn list_owners(&self) -> StoreResult<Vec<OwnerSummary>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT o.slug, o.name, o.language, COUNT(e.id)
               FROM owners o
               LEFT JOIN entries e ON e.owner_id = o.id
               GROUP BY o.id
               ORDER BY o.slug"#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(OwnerSummary {
                slug: row.get(0)?,
                name: row.get(1)?,
                language: row.get(2)?,
                entry_count: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Get one entry by id
    pub fn get_entry(&self, id: EntryId) -> StoreResult<Entry> {
        load_entry(&self.conn, id)
    }

    /// All entries of an owner in document order
    pub fn entries_for_owner(&self, owner_id: OwnerId) -> StoreResult<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries e JOIN owners o ON o.id = e.owner_id
             WHERE e.owner_id = ?1 ORDER BY e.order_index, e.id",
            ENTRY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id], entry_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Get store statistics
    pub fn statistics(&self) -> StoreResult<StoreStats> {
        let count = |table: &str| -> StoreResult<usize> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            owners: count("owners")?,
            entries: count("entries")?,
            tags: count("tags")?,
            relations: count("entry_tags")?,
            stable_entries: count("stable_entries")?,
            db_size_bytes: self
                .path
                .as_ref()
                .and_then(|p| fs::metadata(p).ok())
                .map(|m| m.len())
                .unwrap_or(0),
        })
    }
}

// =========================================================================
// Connection-level helpers
//
// These take a plain `&Connection` so they work both on the store's
// connection and inside a `Transaction`.
// =========================================================================

pub(crate) fn find_owner(conn: &Connection, slug: &str) -> StoreResult<Option<Owner>> {
    Ok(conn
        .query_row(
            "SELECT id, slug, name, base_slug, language, created_at FROM owners WHERE slug = ?1",
            params![slug],
            |row| {
                Ok(Owner {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    name: row.get(2)?,
                    base_slug: row.get(3)?,
                    language: row.get(4)?,
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            },
        )
        .optional()?)
}

/// Get or create an owner; an existing owner keeps its stored name
pub(crate) fn ensure_owner(
    conn: &Connection,
    slug: &str,
    name: &str,
    base_slug: &str,
    language: &str,
) -> StoreResult<OwnerId> {
    if let Some(owner) = find_owner(conn, slug)? {
        return Ok(owner.id);
    }
    conn.execute(
        "INSERT INTO owners (slug, name, base_slug, language, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![slug, name, base_slug, language, now_rfc3339()],
    )?;
    debug!(slug, language, "created owner");
    Ok(conn.last_insert_rowid())
}

pub(crate) fn load_entry(conn: &Connection, id: EntryId) -> StoreResult<Entry> {
    let sql = format!(
        "SELECT {} FROM entries e JOIN owners o ON o.id = e.owner_id WHERE e.id = ?1",
        ENTRY_COLUMNS
    );
    conn.query_row(&sql, params![id], entry_from_row)
        .optional()?
        .ok_or_else(|| StoreError::not_found("entry", id))
}

pub(crate) fn find_entry_by_identity(
    conn: &Connection,
    owner_id: OwnerId,
    section: &str,
    identity_key: &str,
) -> StoreResult<Option<Entry>> {
    let sql = format!(
        "SELECT {} FROM entries e JOIN owners o ON o.id = e.owner_id
         WHERE e.owner_id = ?1 AND e.section = ?2 AND e.identity_key = ?3",
        ENTRY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![owner_id, section, identity_key], entry_from_row)
        .optional()?)
}

/// Insert an entry; the payload's tag field is also kept as its original tags
pub(crate) fn insert_entry(conn: &Connection, entry: &NewEntry<'_>) -> StoreResult<EntryId> {
    let now = now_rfc3339();
    conn.execute(
        r#"INSERT INTO entries
           (owner_id, section, kind, order_index, payload, identity_key, created_at, updated_at,
            original_tags)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)"#,
        params![
            entry.owner_id,
            entry.section,
            entry.kind.as_str(),
            entry.order_index,
            serde_json::to_string(entry.payload)?,
            entry.identity_key,
            now,
            original_tags_of(entry.payload)?
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite an entry's payload
pub(crate) fn write_payload(conn: &Connection, id: EntryId, payload: &Value) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE entries SET payload = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, serde_json::to_string(payload)?, now_rfc3339()],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("entry", id));
    }
    Ok(())
}

/// Overwrite an entry's payload and position (import upsert)
///
/// The imported tag field replaces the entry's original tags.
pub(crate) fn write_payload_and_order(
    conn: &Connection,
    id: EntryId,
    payload: &Value,
    order_index: i64,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE entries SET payload = ?2, order_index = ?3, updated_at = ?4, original_tags = ?5
         WHERE id = ?1",
        params![
            id,
            serde_json::to_string(payload)?,
            order_index,
            now_rfc3339(),
            original_tags_of(payload)?
        ],
    )?;
    Ok(())
}

/// Overwrite an entry's original tags; `None` means the entry had no tag field
pub(crate) fn write_original_tags(
    conn: &Connection,
    id: EntryId,
    original_tags: Option<&Value>,
) -> StoreResult<()> {
    let text = original_tags.map(serde_json::to_string).transpose()?;
    conn.execute(
        "UPDATE entries SET original_tags = ?2 WHERE id = ?1",
        params![id, text],
    )?;
    Ok(())
}

fn original_tags_of(payload: &Value) -> StoreResult<Option<String>> {
    Ok(payload
        .get(TAG_FIELD)
        .map(serde_json::to_string)
        .transpose()?)
}

/// Drop translation groups that no longer have any language link
pub(crate) fn delete_empty_stable_entries(conn: &Connection) -> StoreResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM stable_entries
         WHERE NOT EXISTS (SELECT 1 FROM entry_lang_links l WHERE l.stable_id = stable_entries.id)",
        [],
    )?;
    if deleted > 0 {
        debug!(deleted, "removed empty translation groups");
    }
    Ok(deleted)
}

pub(crate) fn write_identity_key(
    conn: &Connection,
    id: EntryId,
    identity_key: &str,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE entries SET identity_key = ?2 WHERE id = ?1",
        params![id, identity_key],
    )?;
    Ok(())
}

pub(crate) fn delete_entry_row(conn: &Connection, id: EntryId) -> StoreResult<()> {
    let changed = conn.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(StoreError::not_found("entry", id));
    }
    Ok(())
}

/// Delete every entry of an owner under a top-level section, including
/// synthetic tree paths below it
pub(crate) fn delete_section_entries(
    conn: &Connection,
    owner_id: OwnerId,
    section: &str,
) -> StoreResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM entries
         WHERE owner_id = ?1 AND (section = ?2 OR substr(section, 1, length(?2) + 1) = ?2 || '/')",
        params![owner_id, section],
    )?;
    Ok(deleted)
}

/// Next free order index for an owner
pub(crate) fn next_order_index(conn: &Connection, owner_id: OwnerId) -> StoreResult<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(order_index) FROM entries WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    Ok(max.map_or(0, |m| m + 1))
}

pub(crate) fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let kind: String = row.get(4)?;
    Ok(Entry {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        owner_slug: row.get(2)?,
        section: row.get(3)?,
        kind: EntryKind::parse(&kind).unwrap_or(EntryKind::List),
        order_index: row.get(5)?,
        payload: row.get(6)?,
        identity_key: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        updated_at: parse_datetime(row.get::<_, String>(9)?),
        original_tags: row.get(10)?,
    })
}

/// Run a read operation, retrying while the database is locked by a writer
pub fn retry_on_busy<T>(
    attempts: u32,
    mut op: impl FnMut() -> StoreResult<T>,
) -> StoreResult<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_busy() && attempt < attempts => {
                warn!(attempt, "store is busy, retrying read");
                std::thread::sleep(Duration::from_millis(100 * u64::from(attempt)));
                attempt += 1;
            }
            result => return result,
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Parse datetime string to DateTime<Utc>
pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_file_and_schema() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/cv.db");
        let store = CvStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.statistics().unwrap().entries, 0);

        // Reopening an existing store keeps working
        drop(store);
        CvStore::open(&path).unwrap();
    }

    #[test]
    fn test_version_one_store_gains_original_tags() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("cv.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE schema_version (version INTEGER PRIMARY KEY);
                INSERT INTO schema_version (version) VALUES (1);
                CREATE TABLE owners (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slug TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    base_slug TEXT NOT NULL,
                    language TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
                    section TEXT NOT NULL,
                    kind TEXT NOT NULL DEFAULT 'list',
                    order_index INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    identity_key TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                INSERT INTO owners VALUES (1, 'jane', 'Jane', 'jane', 'en', '2024-01-01T00:00:00Z');
                INSERT INTO entries VALUES
                    (1, 1, 'projects', 'list', 0, '{"title":"A","type_key":["X"]}', 'projects:A',
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z'),
                    (2, 1, 'projects', 'list', 1, '{"title":"B"}', 'projects:B',
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
                "#,
            )
            .unwrap();
        }

        let store = CvStore::open(&path).unwrap();
        let tagged = store.get_entry(1).unwrap();
        assert_eq!(tagged.parse_original_tags().unwrap(), Some(json!(["X"])));
        assert_eq!(store.get_entry(2).unwrap().original_tags, None);

        let version: i32 = store
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_original_tags_follow_inserts_and_upserts_only() {
        let store = CvStore::open_in_memory().unwrap();
        let owner = ensure_owner(&store.conn, "jane", "Jane", "jane", "en").unwrap();
        let id = insert_entry(
            &store.conn,
            &NewEntry {
                owner_id: owner,
                section: "projects",
                kind: EntryKind::List,
                order_index: 0,
                payload: &json!({"title": "A", "type_key": ["X"]}),
                identity_key: Some("projects:A"),
            },
        )
        .unwrap();

        write_payload(&store.conn, id, &json!({"title": "A", "type_key": ["X", "Y"]})).unwrap();
        let entry = store.get_entry(id).unwrap();
        assert_eq!(entry.parse_original_tags().unwrap(), Some(json!(["X"])));

        write_payload_and_order(&store.conn, id, &json!({"title": "A"}), 3).unwrap();
        let entry = store.get_entry(id).unwrap();
        assert_eq!(entry.original_tags, None);
        assert_eq!(entry.order_index, 3);
    }

    #[test]
    fn test_owner_get_or_create() {
        let store = CvStore::open_in_memory().unwrap();
        let a = ensure_owner(&store.conn, "jane", "Jane", "jane", "en").unwrap();
        let b = ensure_owner(&store.conn, "jane", "Other", "jane", "en").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get_owner("jane").unwrap().name, "Jane");
        assert!(matches!(
            store.get_owner("nobody"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_entry_insert_lookup_and_section_delete() {
        let store = CvStore::open_in_memory().unwrap();
        let owner = ensure_owner(&store.conn, "jane", "Jane", "jane", "en").unwrap();
        let payload = json!({"short_name": "Rust"});

        let skill = insert_entry(
            &store.conn,
            &NewEntry {
                owner_id: owner,
                section: "skills/A/B/Rust",
                kind: EntryKind::Tree,
                order_index: 0,
                payload: &payload,
                identity_key: Some("skills/A/B/Rust"),
            },
        )
        .unwrap();
        let other = insert_entry(
            &store.conn,
            &NewEntry {
                owner_id: owner,
                section: "skillset",
                kind: EntryKind::List,
                order_index: 1,
                payload: &payload,
                identity_key: Some("skillset:x"),
            },
        )
        .unwrap();

        let found = find_entry_by_identity(&store.conn, owner, "skills/A/B/Rust", "skills/A/B/Rust")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, skill);
        assert_eq!(found.kind, EntryKind::Tree);
        assert_eq!(found.parse_payload().unwrap(), payload);
        assert_eq!(next_order_index(&store.conn, owner).unwrap(), 2);

        assert_eq!(delete_section_entries(&store.conn, owner, "skills").unwrap(), 1);
        assert!(store.get_entry(other).is_ok());
        assert!(matches!(
            store.get_entry(skill),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_payload_is_integrity_error() {
        let store = CvStore::open_in_memory().unwrap();
        let owner = ensure_owner(&store.conn, "jane", "Jane", "jane", "en").unwrap();
        let id = insert_entry(
            &store.conn,
            &NewEntry {
                owner_id: owner,
                section: "projects",
                kind: EntryKind::List,
                order_index: 0,
                payload: &json!({}),
                identity_key: None,
            },
        )
        .unwrap();
        store
            .conn
            .execute("UPDATE entries SET payload = '{broken' WHERE id = ?1", params![id])
            .unwrap();
        let entry = store.get_entry(id).unwrap();
        assert!(matches!(entry.parse_payload(), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn test_retry_on_busy_gives_up_on_other_errors() {
        let mut calls = 0;
        let result: StoreResult<()> = retry_on_busy(3, || {
            calls += 1;
            Err(StoreError::Conflict("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_on_busy_retries_export_read() {
        let store = CvStore::open_in_memory().unwrap();
        ensure_owner(&store.conn, "jane", "Jane", "jane", "en").unwrap();

        let mut calls = 0;
        let report = retry_on_busy(3, || {
            calls += 1;
            if calls == 1 {
                return Err(StoreError::Storage(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    None,
                )));
            }
            store.export_owner("jane", crate::core::pipeline::TagMode::None)
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(report.owner, "jane");

        let mut calls = 0;
        let result: StoreResult<()> = retry_on_busy(2, || {
            calls += 1;
            Err(StoreError::Storage(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            )))
        });
        assert!(result.unwrap_err().is_busy());
        assert_eq!(calls, 2);
    }
}
