//! Tag lifecycle management
//!
//! This is the only module that writes the `entry_tags` relation or the
//! embedded `type_key` field of a payload. Every public operation runs in a
//! single transaction, so after it returns the catalog, the relation table
//! and the payload fields agree (or nothing changed at all).
//!
//! Rename is the one deliberate exception: relations reference tags by id so
//! only the catalog row changes, and payload fields keep the old name until
//! the next export with `apply` tag mode or the next tag change on the entry,
//! which rewrites the field from the entry's relations.
//!
//! An entry's original tags (its tag field at import time) are left alone,
//! except that deleting a tag removes it there too.

use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::document::{embedded_tags, has_tag_field, merge_tag_order, set_embedded_tags};
use crate::core::error::{StoreError, StoreResult};
use crate::core::store::{
    load_entry, now_rfc3339, parse_datetime, write_original_tags, write_payload, CvStore, Entry,
    EntryId, OwnerId, Tag, TagId, TagUsage,
};

/// Outcome of a tag deletion
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteTagReport {
    pub tag: String,
    pub relations_removed: usize,
    pub payloads_updated: usize,
}

/// Outcome of stripping payload references to unknown tags
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub entries_scanned: usize,
    pub entries_updated: usize,
    pub references_removed: usize,
    pub removed_names: BTreeSet<String>,
    /// Entries skipped because their payload is not valid JSON
    pub unparsable: Vec<EntryId>,
}

impl CvStore {
    /// Create a tag; fails if the exact name already exists
    pub fn create_tag(&mut self, name: &str, description: Option<&str>) -> StoreResult<Tag> {
        let name = validate_name(name)?;
        if find_tag(&self.conn, name)?.is_some() {
            return Err(StoreError::Conflict(format!("tag '{}' already exists", name)));
        }
        self.conn.execute(
            "INSERT INTO tags (name, description, created_at) VALUES (?1, ?2, ?3)",
            params![name, description, now_rfc3339()],
        )?;
        info!(tag = name, "created tag");
        self.get_tag(name)
    }

    /// Get a tag by exact name
    pub fn get_tag(&self, name: &str) -> StoreResult<Tag> {
        find_tag(&self.conn, name)?.ok_or_else(|| StoreError::not_found("tag", name))
    }

    /// List all tags with the number of entries using each
    pub fn list_tags(&self) -> StoreResult<Vec<TagUsage>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT t.name, t.description, COUNT(et.entry_id)
               FROM tags t
               LEFT JOIN entry_tags et ON et.tag_id = t.id
               GROUP BY t.id
               ORDER BY t.name"#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TagUsage {
                name: row.get(0)?,
                description: row.get(1)?,
                entry_count: row.get::<_, i64>(2)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Tag names related to an entry, sorted
    pub fn tags_for_entry(&self, entry_id: EntryId) -> StoreResult<Vec<String>> {
        load_entry(&self.conn, entry_id)?;
        relation_names(&self.conn, entry_id)
    }

    /// Rename a tag in place; relations follow automatically
    pub fn rename_tag(&mut self, old: &str, new: &str) -> StoreResult<()> {
        let new = validate_name(new)?;
        if old == new {
            self.get_tag(old)?;
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        let tag = find_tag(&tx, old)?.ok_or_else(|| StoreError::not_found("tag", old))?;
        if find_tag(&tx, new)?.is_some() {
            return Err(StoreError::Conflict(format!("tag '{}' already exists", new)));
        }
        tx.execute(
            "UPDATE tags SET name = ?2 WHERE id = ?1",
            params![tag.id, new],
        )?;
        tx.commit()?;

        info!(from = old, to = new, "renamed tag");
        Ok(())
    }

    /// Delete a tag, its relations, and its name from every related payload
    pub fn delete_tag(&mut self, name: &str) -> StoreResult<DeleteTagReport> {
        let tx = self.conn.transaction()?;
        let tag = find_tag(&tx, name)?.ok_or_else(|| StoreError::not_found("tag", name))?;

        let affected: Vec<EntryId> = {
            let mut stmt = tx.prepare("SELECT entry_id FROM entry_tags WHERE tag_id = ?1")?;
            let rows = stmt.query_map(params![tag.id], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let relations_removed =
            tx.execute("DELETE FROM entry_tags WHERE tag_id = ?1", params![tag.id])?;
        tx.execute("DELETE FROM tags WHERE id = ?1", params![tag.id])?;

        let mut payloads_updated = 0;
        for entry_id in affected {
            let entry = load_entry(&tx, entry_id)?;
            let mut payload = entry.parse_payload()?;
            let before = embedded_tags(&payload);
            if reconcile_embedded(&tx, entry_id, &mut payload)? {
                payloads_updated += 1;
            }

            // The entry also forgets the tag in its original tags, under
            // whatever name its payload still used for it
            let after = embedded_tags(&payload);
            let mut dropped: Vec<String> =
                before.into_iter().filter(|n| !after.contains(n)).collect();
            dropped.push(name.to_string());
            strip_original_tags(&tx, &entry, &dropped)?;
        }

        tx.commit()?;
        info!(
            tag = name,
            relations_removed, payloads_updated, "deleted tag"
        );

        Ok(DeleteTagReport {
            tag: name.to_string(),
            relations_removed,
            payloads_updated,
        })
    }

    /// Attach a tag to an entry, creating the tag if needed
    ///
    /// Returns false when the entry already had the tag.
    pub fn assign_tag(&mut self, entry_id: EntryId, name: &str) -> StoreResult<bool> {
        let name = validate_name(name)?;
        let tx = self.conn.transaction()?;
        let entry = load_entry(&tx, entry_id)?;
        let mut payload = entry.parse_payload()?;

        if !payload.is_object() {
            return Err(StoreError::Validation(format!(
                "entry {} payload is not an object and cannot carry tags",
                entry_id
            )));
        }

        let tag_id = get_or_create_tag(&tx, name)?;
        let added = ensure_relation(&tx, entry_id, tag_id)?;
        reconcile_embedded(&tx, entry_id, &mut payload)?;

        tx.commit()?;
        debug!(entry_id, tag = name, added, "assigned tag");
        Ok(added)
    }

    /// Detach a tag from an entry
    ///
    /// Returns false when the entry did not have the tag.
    pub fn unassign_tag(&mut self, entry_id: EntryId, name: &str) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        let entry = load_entry(&tx, entry_id)?;
        let tag = find_tag(&tx, name)?.ok_or_else(|| StoreError::not_found("tag", name))?;
        let mut payload = entry.parse_payload()?;

        let removed = tx.execute(
            "DELETE FROM entry_tags WHERE entry_id = ?1 AND tag_id = ?2",
            params![entry_id, tag.id],
        )? > 0;

        reconcile_embedded(&tx, entry_id, &mut payload)?;

        tx.commit()?;
        debug!(entry_id, tag = name, removed, "unassigned tag");
        Ok(removed)
    }

    /// Strip payload tag names that are not in the catalog
    pub fn cleanup_orphan_references(&mut self) -> StoreResult<CleanupReport> {
        let tx = self.conn.transaction()?;
        let catalog: HashSet<String> = {
            let mut stmt = tx.prepare("SELECT name FROM tags")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<HashSet<_>, _>>()?
        };
        let entries: Vec<(EntryId, String)> = {
            let mut stmt = tx.prepare("SELECT id, payload FROM entries ORDER BY id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut report = CleanupReport::default();
        for (entry_id, raw) in entries {
            report.entries_scanned += 1;
            let Ok(mut payload) = serde_json::from_str::<Value>(&raw) else {
                report.unparsable.push(entry_id);
                continue;
            };
            if !has_tag_field(&payload) {
                continue;
            }

            let names = embedded_tags(&payload);
            let (kept, orphans): (Vec<String>, Vec<String>) =
                names.into_iter().partition(|n| catalog.contains(n));
            if orphans.is_empty() {
                continue;
            }

            set_embedded_tags(&mut payload, &kept)?;
            write_payload(&tx, entry_id, &payload)?;
            report.entries_updated += 1;
            report.references_removed += orphans.len();
            report.removed_names.extend(orphans);
        }

        tx.commit()?;
        info!(
            updated = report.entries_updated,
            removed = report.references_removed,
            "cleaned up orphan tag references"
        );
        Ok(report)
    }
}

// =========================================================================
// Crate-internal helpers, used by import and the multi-language engine
// =========================================================================

fn find_tag(conn: &Connection, name: &str) -> StoreResult<Option<Tag>> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, created_at FROM tags WHERE name = ?1",
            params![name],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    created_at: parse_datetime(row.get::<_, String>(3)?),
                })
            },
        )
        .optional()?)
}

fn validate_name(name: &str) -> StoreResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation("tag name must not be empty".into()));
    }
    Ok(trimmed)
}

/// Get or create a tag by name (implicit creation during import)
pub(crate) fn get_or_create_tag(conn: &Connection, name: &str) -> StoreResult<TagId> {
    let name = validate_name(name)?;
    if let Some(tag) = find_tag(conn, name)? {
        return Ok(tag.id);
    }
    conn.execute(
        "INSERT INTO tags (name, description, created_at) VALUES (?1, NULL, ?2)",
        params![name, now_rfc3339()],
    )?;
    debug!(tag = name, "created tag on first reference");
    Ok(conn.last_insert_rowid())
}

/// Ensure an entry/tag relation exists; true if it was inserted
pub(crate) fn ensure_relation(conn: &Connection, entry_id: EntryId, tag_id: TagId) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO entry_tags (entry_id, tag_id) VALUES (?1, ?2)",
        params![entry_id, tag_id],
    )?;
    Ok(inserted > 0)
}

/// Ensure relations for the given names exist; returns how many were added
pub(crate) fn link_names(conn: &Connection, entry_id: EntryId, names: &[String]) -> StoreResult<usize> {
    let mut added = 0;
    for name in names {
        let tag_id = get_or_create_tag(conn, name)?;
        if ensure_relation(conn, entry_id, tag_id)? {
            added += 1;
        }
    }
    Ok(added)
}

/// Make an entry's relations and embedded tag field both equal `names`
///
/// The payload is modified in place and written back.
pub(crate) fn set_entry_tags(
    conn: &Connection,
    entry_id: EntryId,
    payload: &mut Value,
    names: &[String],
) -> StoreResult<()> {
    conn.execute("DELETE FROM entry_tags WHERE entry_id = ?1", params![entry_id])?;
    link_names(conn, entry_id, names)?;
    if payload.is_object() {
        set_embedded_tags(payload, names)?;
    } else if !names.is_empty() {
        return Err(StoreError::Validation(format!(
            "entry {} payload is not an object and cannot carry tags",
            entry_id
        )));
    }
    write_payload(conn, entry_id, payload)
}

/// Tag names related to one entry, sorted
pub(crate) fn relation_names(conn: &Connection, entry_id: EntryId) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM entry_tags et JOIN tags t ON t.id = et.tag_id
         WHERE et.entry_id = ?1 ORDER BY t.name",
    )?;
    let rows = stmt.query_map(params![entry_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Related tag names for every entry of an owner
pub(crate) fn relations_for_owner(
    conn: &Connection,
    owner_id: OwnerId,
) -> StoreResult<HashMap<EntryId, Vec<String>>> {
    let mut stmt = conn.prepare(
        r#"SELECT et.entry_id, t.name
           FROM entry_tags et
           JOIN tags t ON t.id = et.tag_id
           JOIN entries e ON e.id = et.entry_id
           WHERE e.owner_id = ?1
           ORDER BY t.name"#,
    )?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok((row.get::<_, EntryId>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut map: HashMap<EntryId, Vec<String>> = HashMap::new();
    for row in rows {
        let (entry_id, name) = row?;
        map.entry(entry_id).or_default().push(name);
    }
    Ok(map)
}

/// Rewrite the embedded tag list to the entry's related names
///
/// Names still related keep their payload order, stale ones are dropped and
/// new ones appended. Returns true if the payload was written.
fn reconcile_embedded(
    conn: &Connection,
    entry_id: EntryId,
    payload: &mut Value,
) -> StoreResult<bool> {
    if !payload.is_object() {
        return Ok(false);
    }
    let before = embedded_tags(payload);
    let after = merge_tag_order(&before, &relation_names(conn, entry_id)?);
    if before == after {
        return Ok(false);
    }
    set_embedded_tags(payload, &after)?;
    write_payload(conn, entry_id, payload)?;
    Ok(true)
}

/// Remove names from an entry's original tags, dropping the field once empty
fn strip_original_tags(conn: &Connection, entry: &Entry, names: &[String]) -> StoreResult<()> {
    let Some(original) = entry.parse_original_tags()? else {
        return Ok(());
    };
    let dropped = |v: &Value| v.as_str().is_some_and(|s| names.iter().any(|n| n == s.trim()));

    let stripped = match &original {
        Value::String(_) if dropped(&original) => None,
        Value::Array(items) if items.iter().any(dropped) => {
            let kept: Vec<Value> = items.iter().filter(|v| !dropped(*v)).cloned().collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        _ => return Ok(()),
    };
    write_original_tags(conn, entry.id, stripped.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{ensure_owner, insert_entry, EntryKind, NewEntry};
    use serde_json::json;

    fn store_with_entry(payload: Value) -> (CvStore, EntryId) {
        let store = CvStore::open_in_memory().unwrap();
        let owner = ensure_owner(&store.conn, "jane", "Jane", "jane", "en").unwrap();
        let id = insert_entry(
            &store.conn,
            &NewEntry {
                owner_id: owner,
                section: "projects",
                kind: EntryKind::List,
                order_index: 0,
                payload: &payload,
                identity_key: Some("projects:x"),
            },
        )
        .unwrap();
        let names = embedded_tags(&payload);
        link_names(&store.conn, id, &names).unwrap();
        (store, id)
    }

    fn payload_of(store: &CvStore, id: EntryId) -> Value {
        store.get_entry(id).unwrap().parse_payload().unwrap()
    }

    #[test]
    fn test_create_tag_rejects_duplicates_case_sensitively() {
        let mut store = CvStore::open_in_memory().unwrap();
        store.create_tag("Academic", Some("papers")).unwrap();
        assert!(matches!(
            store.create_tag("Academic", None),
            Err(StoreError::Conflict(_))
        ));
        store.create_tag("academic", None).unwrap();
        assert_eq!(store.list_tags().unwrap().len(), 2);
        assert!(matches!(
            store.create_tag("  ", None),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_cascades_into_payload() {
        let (mut store, id) = store_with_entry(json!({
            "title": "Thesis",
            "type_key": ["Full CV", "Academic"]
        }));

        let report = store.delete_tag("Academic").unwrap();
        assert_eq!(report.relations_removed, 1);
        assert_eq!(report.payloads_updated, 1);

        assert!(matches!(
            store.get_tag("Academic"),
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.tags_for_entry(id).unwrap(), vec!["Full CV"]);
        assert_eq!(payload_of(&store, id)["type_key"], json!(["Full CV"]));
    }

    #[test]
    fn test_delete_last_tag_drops_field() {
        let (mut store, id) = store_with_entry(json!({"title": "T", "type_key": "Academic"}));
        store.delete_tag("Academic").unwrap();
        assert!(payload_of(&store, id).get("type_key").is_none());
    }

    #[test]
    fn test_delete_rolls_back_on_invalid_payload() {
        let (mut store, id) = store_with_entry(json!({"title": "T", "type_key": ["Academic"]}));
        store
            .conn
            .execute("UPDATE entries SET payload = '{broken' WHERE id = ?1", params![id])
            .unwrap();

        assert!(matches!(
            store.delete_tag("Academic"),
            Err(StoreError::Integrity(_))
        ));
        assert!(store.get_tag("Academic").is_ok());
        assert_eq!(store.tags_for_entry(id).unwrap(), vec!["Academic"]);
    }

    #[test]
    fn test_rename_keeps_relations_but_not_payload() {
        let (mut store, id) = store_with_entry(json!({"title": "T", "type_key": ["Academic"]}));
        store.rename_tag("Academic", "Research").unwrap();

        assert_eq!(store.tags_for_entry(id).unwrap(), vec!["Research"]);
        assert_eq!(payload_of(&store, id)["type_key"], json!(["Academic"]));

        store.create_tag("Other", None).unwrap();
        assert!(matches!(
            store.rename_tag("Research", "Other"),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.rename_tag("Missing", "X"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_assign_and_unassign_keep_payload_in_sync() {
        let (mut store, id) = store_with_entry(json!({"title": "T"}));

        assert!(store.assign_tag(id, "Programming").unwrap());
        assert!(!store.assign_tag(id, "Programming").unwrap());
        assert_eq!(store.tags_for_entry(id).unwrap(), vec!["Programming"]);
        assert_eq!(payload_of(&store, id)["type_key"], json!(["Programming"]));

        assert!(store.unassign_tag(id, "Programming").unwrap());
        assert!(store.tags_for_entry(id).unwrap().is_empty());
        assert!(payload_of(&store, id).get("type_key").is_none());
    }

    #[test]
    fn test_delete_after_rename_strips_stale_name() {
        let (mut store, id) = store_with_entry(json!({"title": "T", "type_key": ["Academic"]}));
        store.rename_tag("Academic", "Research").unwrap();

        let report = store.delete_tag("Research").unwrap();
        assert_eq!(report.payloads_updated, 1);
        assert!(store.tags_for_entry(id).unwrap().is_empty());
        assert!(payload_of(&store, id).get("type_key").is_none());
        assert_eq!(store.get_entry(id).unwrap().original_tags, None);

        // Recreating the old name does not bring it back onto the entry
        store.create_tag("Academic", None).unwrap();
        assert!(store.tags_for_entry(id).unwrap().is_empty());
        assert!(store.doctor().unwrap().tag_drift.is_empty());
    }

    #[test]
    fn test_assign_after_rename_rewrites_payload_from_relations() {
        let (mut store, id) = store_with_entry(json!({
            "title": "T",
            "type_key": ["Full CV", "Academic"]
        }));
        store.rename_tag("Academic", "Research").unwrap();

        store.assign_tag(id, "Programming").unwrap();
        assert_eq!(
            payload_of(&store, id)["type_key"],
            json!(["Full CV", "Programming", "Research"])
        );

        store.unassign_tag(id, "Programming").unwrap();
        assert_eq!(
            payload_of(&store, id)["type_key"],
            json!(["Full CV", "Research"])
        );
        // Original tags are untouched by assignment changes
        assert_eq!(
            store.get_entry(id).unwrap().parse_original_tags().unwrap(),
            Some(json!(["Full CV", "Academic"]))
        );
    }

    #[test]
    fn test_delete_strips_original_tags() {
        let (mut store, id) = store_with_entry(json!({
            "title": "T",
            "type_key": ["Full CV", "Academic"]
        }));
        store.assign_tag(id, "Extra").unwrap();
        store.delete_tag("Academic").unwrap();

        assert_eq!(
            store.get_entry(id).unwrap().parse_original_tags().unwrap(),
            Some(json!(["Full CV"]))
        );
        assert_eq!(payload_of(&store, id)["type_key"], json!(["Full CV", "Extra"]));
    }

    #[test]
    fn test_assign_to_scalar_payload_rolls_back() {
        let (mut store, id) = store_with_entry(json!("plain text"));
        assert!(matches!(
            store.assign_tag(id, "New"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(store.get_tag("New"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_assign_unknown_entry() {
        let mut store = CvStore::open_in_memory().unwrap();
        assert!(matches!(
            store.assign_tag(42, "X"),
            Err(StoreError::NotFound { kind: "entry", .. })
        ));
    }

    #[test]
    fn test_cleanup_strips_unknown_names() {
        let (mut store, id) = store_with_entry(json!({"title": "T", "type_key": ["Keep"]}));
        store
            .conn
            .execute(
                r#"UPDATE entries SET payload = '{"title":"T","type_key":["Keep","Ghost"]}' WHERE id = ?1"#,
                params![id],
            )
            .unwrap();

        let report = store.cleanup_orphan_references().unwrap();
        assert_eq!(report.entries_scanned, 1);
        assert_eq!(report.entries_updated, 1);
        assert_eq!(report.references_removed, 1);
        assert!(report.removed_names.contains("Ghost"));
        assert_eq!(payload_of(&store, id)["type_key"], json!(["Keep"]));
    }

    #[test]
    fn test_set_entry_tags_replaces_both_sides() {
        let (store, id) = store_with_entry(json!({"title": "T", "type_key": ["A", "B"]}));
        let mut payload = payload_of(&store, id);
        set_entry_tags(&store.conn, id, &mut payload, &["C".to_string()]).unwrap();
        assert_eq!(store.tags_for_entry(id).unwrap(), vec!["C"]);
        assert_eq!(payload_of(&store, id)["type_key"], json!(["C"]));
    }
}
