//! Database schema initialization

use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::{CvStore, SCHEMA_VERSION};
use crate::core::error::{StoreError, StoreResult};

impl CvStore {
    /// Create all tables if missing and check the schema version
    pub(super) fn init_schema(&mut self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            -- CV subjects, one per document file
            CREATE TABLE IF NOT EXISTS owners (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                base_slug TEXT NOT NULL,
                language TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_owners_base ON owners(base_slug);

            -- Entries: structural columns plus an opaque JSON payload
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
                section TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'list',
                order_index INTEGER NOT NULL,
                payload TEXT NOT NULL,
                identity_key TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                -- tag field as imported, JSON; NULL when the item had none
                original_tags TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_entries_owner ON entries(owner_id, order_index);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_identity
                ON entries(owner_id, section, identity_key);

            -- Tag catalog (names are case-sensitive)
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at TEXT NOT NULL
            );

            -- Entry <-> tag relation
            CREATE TABLE IF NOT EXISTS entry_tags (
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (entry_id, tag_id)
            );
            CREATE INDEX IF NOT EXISTS idx_entry_tags_tag ON entry_tags(tag_id);

            -- Translation groups
            CREATE TABLE IF NOT EXISTS stable_entries (
                id TEXT PRIMARY KEY,
                section TEXT NOT NULL,
                base_slug TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One link per (group, language)
            CREATE TABLE IF NOT EXISTS entry_lang_links (
                stable_id TEXT NOT NULL REFERENCES stable_entries(id) ON DELETE CASCADE,
                language TEXT NOT NULL,
                entry_id INTEGER NOT NULL UNIQUE REFERENCES entries(id) ON DELETE CASCADE,
                needs_translation INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (stable_id, language)
            );
            "#,
        )?;

        let current: Option<i32> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .optional()?
            .flatten();

        match current {
            None => {
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(StoreError::Validation(format!(
                    "store schema version {} is newer than supported version {}",
                    v, SCHEMA_VERSION
                )));
            }
            Some(1) => self.migrate_v1()?,
            Some(_) => {}
        }

        Ok(())
    }

    /// Version 2 keeps each entry's imported tag field apart from the live one
    fn migrate_v1(&mut self) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            ALTER TABLE entries ADD COLUMN original_tags TEXT;
            UPDATE entries SET original_tags = json_extract(payload, '$.type_key')
                WHERE json_valid(payload) AND json_type(payload, '$.type_key') = 'array';
            UPDATE entries SET original_tags = json_quote(json_extract(payload, '$.type_key'))
                WHERE json_valid(payload) AND json_type(payload, '$.type_key') = 'text';
            "#,
        )?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        tx.commit()?;
        info!(from = 1, to = SCHEMA_VERSION, "migrated store schema");
        Ok(())
    }
}
