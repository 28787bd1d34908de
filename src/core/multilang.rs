//! Multi-language linkage engine
//!
//! A logical entry that exists in several languages is modelled as one
//! [`StableEntry`] plus one [`LangLink`] per language variant. Each variant
//! is an ordinary entry owned by the owner for that language
//! (`<base>` for the default language, `<base>_<lang>` otherwise).
//!
//! Fields are either shared (copied across variants) or text (translated
//! per language), as classified in [`crate::core::sections`]. Tags are a
//! shared field and are always written through the tag manager.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::config::Languages;
use crate::core::document::{embedded_tags, DocumentName};
use crate::core::error::{StoreError, StoreResult};
use crate::core::identity::{flat_key, tree_keys, StableId};
use crate::core::sections::{is_tree_section, root_section, shared_fields, TAG_FIELD};
use crate::core::store::{
    delete_empty_stable_entries, delete_entry_row, ensure_owner, find_entry_by_identity,
    insert_entry, load_entry, next_order_index, now_rfc3339, parse_datetime, write_identity_key,
    write_original_tags, CvStore, Entry, EntryId, EntryKind, LangLink, NewEntry, StableEntry,
};
use crate::core::tags::set_entry_tags;

/// Result of creating a linked entry
#[derive(Debug, Clone, Serialize)]
pub struct LinkedGroup {
    pub stable_id: StableId,
    /// One link per language, source language first
    pub links: Vec<LangLink>,
}

/// Result of updating an entry
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub entry_id: EntryId,
    /// Other language variants whose shared fields were overwritten
    pub synced: Vec<EntryId>,
}

impl CvStore {
    /// Create an entry in `source_language` and a linked placeholder in every
    /// other configured language
    ///
    /// For tree sections `section` is `skills/<category>/<subcategory>`.
    /// Placeholders carry the source's shared fields and a copy of its text
    /// fields, and are flagged as needing translation.
    pub fn create_with_sync(
        &mut self,
        base_slug: &str,
        section: &str,
        data: &Value,
        source_language: &str,
        languages: &Languages,
    ) -> StoreResult<LinkedGroup> {
        if !data.is_object() {
            return Err(StoreError::Validation(
                "entry data must be an object".to_string(),
            ));
        }
        if !languages.contains(source_language) {
            return Err(StoreError::Validation(format!(
                "source language '{}' is not configured",
                source_language
            )));
        }

        let (entry_section, kind, identity_key) = resolve_section(section, data)?;
        let tags = embedded_tags(data);

        let mut ordered: Vec<&str> = vec![source_language];
        ordered.extend(
            languages
                .all
                .iter()
                .map(String::as_str)
                .filter(|l| *l != source_language),
        );

        let tx = self.conn.transaction()?;
        let stable_id = StableId::new();
        let now = now_rfc3339();
        tx.execute(
            "INSERT INTO stable_entries (id, section, base_slug, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![stable_id.to_string(), root_section(section), base_slug, now],
        )?;

        let mut links = Vec::with_capacity(ordered.len());
        for language in ordered {
            let slug = DocumentName::slug_for(base_slug, language, &languages.default);
            let owner_id = ensure_owner(&tx, &slug, base_slug, base_slug, language)?;

            if find_entry_by_identity(&tx, owner_id, &entry_section, &identity_key)?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "owner '{}' already has an entry with identity key '{}'",
                    slug, identity_key
                )));
            }

            let mut payload = data.clone();
            let order_index = next_order_index(&tx, owner_id)?;
            let entry_id = insert_entry(
                &tx,
                &NewEntry {
                    owner_id,
                    section: &entry_section,
                    kind,
                    order_index,
                    payload: &payload,
                    identity_key: Some(&identity_key),
                },
            )?;
            set_entry_tags(&tx, entry_id, &mut payload, &tags)?;

            let needs_translation = language != source_language;
            tx.execute(
                "INSERT INTO entry_lang_links (stable_id, language, entry_id, needs_translation)
                 VALUES (?1, ?2, ?3, ?4)",
                params![stable_id.to_string(), language, entry_id, needs_translation],
            )?;
            links.push(LangLink {
                stable_id: stable_id.to_string(),
                language: language.to_string(),
                entry_id,
                needs_translation,
            });
        }

        tx.commit()?;
        info!(stable_id = %stable_id, section, languages = links.len(), "created linked entry");
        Ok(LinkedGroup { stable_id, links })
    }

    /// Replace an entry's payload, optionally copying its shared fields to
    /// every other language variant
    ///
    /// Text fields of other variants are never touched. Updating an entry
    /// directly marks it as translated.
    pub fn update_entry(
        &mut self,
        entry_id: EntryId,
        data: &Value,
        sync_shared: bool,
    ) -> StoreResult<UpdateReport> {
        if data.is_null() {
            return Err(StoreError::Validation("entry data must not be null".into()));
        }

        let tx = self.conn.transaction()?;
        let entry = load_entry(&tx, entry_id)?;
        if entry.kind != EntryKind::Value && !data.is_object() {
            return Err(StoreError::Validation(format!(
                "entry {} is a {} item and needs object data",
                entry_id,
                entry.kind.as_str()
            )));
        }

        let tags = embedded_tags(data);
        let mut payload = data.clone();
        set_entry_tags(&tx, entry_id, &mut payload, &tags)?;
        // New data given directly is what a default export shows from now on
        write_original_tags(&tx, entry_id, data.get(TAG_FIELD))?;
        refresh_identity_key(&tx, &entry, &payload)?;
        tx.execute(
            "UPDATE entry_lang_links SET needs_translation = 0 WHERE entry_id = ?1",
            params![entry_id],
        )?;

        let mut report = UpdateReport {
            entry_id,
            synced: Vec::new(),
        };

        if let Some(link) = find_link(&tx, entry_id)? {
            if sync_shared {
                let fields = shared_fields(&entry.section);
                for other in group_links(&tx, &link.stable_id)? {
                    if other.entry_id == entry_id {
                        continue;
                    }
                    let target = load_entry(&tx, other.entry_id)?;
                    let mut target_payload = target.parse_payload()?;
                    copy_shared_fields(&payload, &mut target_payload, &fields);
                    set_entry_tags(&tx, target.id, &mut target_payload, &tags)?;
                    refresh_identity_key(&tx, &target, &target_payload)?;
                    report.synced.push(target.id);
                }
            }
            tx.execute(
                "UPDATE stable_entries SET updated_at = ?2 WHERE id = ?1",
                params![link.stable_id, now_rfc3339()],
            )?;
        }

        tx.commit()?;
        debug!(entry = entry_id, synced = report.synced.len(), "updated entry");
        Ok(report)
    }

    /// Delete an entry, or with `sync_languages` its whole translation group
    ///
    /// Returns the ids of all deleted entries.
    pub fn delete_entry(
        &mut self,
        entry_id: EntryId,
        sync_languages: bool,
    ) -> StoreResult<Vec<EntryId>> {
        let tx = self.conn.transaction()?;
        load_entry(&tx, entry_id)?;

        let link = find_link(&tx, entry_id)?;
        let mut deleted = Vec::new();

        match (&link, sync_languages) {
            (Some(link), true) => {
                for member in group_links(&tx, &link.stable_id)? {
                    delete_entry_row(&tx, member.entry_id)?;
                    deleted.push(member.entry_id);
                }
                tx.execute(
                    "DELETE FROM stable_entries WHERE id = ?1",
                    params![link.stable_id],
                )?;
            }
            _ => {
                delete_entry_row(&tx, entry_id)?;
                deleted.push(entry_id);
                if link.is_some() {
                    // A group whose last variant is gone goes with it
                    delete_empty_stable_entries(&tx)?;
                }
            }
        }

        tx.commit()?;
        info!(entry = entry_id, deleted = deleted.len(), "deleted entry");
        Ok(deleted)
    }

    /// Group previously unlinked entries under a new stable id
    ///
    /// Entries must exist, be unlinked, share a section root and base slug,
    /// and come from distinct languages.
    pub fn link_existing(&mut self, entry_ids: &[EntryId]) -> StoreResult<LinkedGroup> {
        if entry_ids.is_empty() {
            return Err(StoreError::Validation("no entries to link".into()));
        }

        let tx = self.conn.transaction()?;
        let mut members: Vec<(Entry, String, String)> = Vec::new();
        let mut languages: HashSet<String> = HashSet::new();

        for &id in entry_ids {
            let entry = load_entry(&tx, id)?;
            if find_link(&tx, id)?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "entry {} is already linked",
                    id
                )));
            }
            let (base_slug, language): (String, String) = tx.query_row(
                "SELECT base_slug, language FROM owners WHERE id = ?1",
                params![entry.owner_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if !languages.insert(language.clone()) {
                return Err(StoreError::Conflict(format!(
                    "more than one entry in language '{}'",
                    language
                )));
            }
            members.push((entry, base_slug, language));
        }

        let (first, first_base, _) = &members[0];
        let section = root_section(&first.section).to_string();
        let base_slug = first_base.clone();
        for (entry, base, _) in &members[1..] {
            if root_section(&entry.section) != section {
                return Err(StoreError::Validation(format!(
                    "entry {} is in section '{}', expected '{}'",
                    entry.id,
                    root_section(&entry.section),
                    section
                )));
            }
            if *base != base_slug {
                return Err(StoreError::Validation(format!(
                    "entry {} belongs to '{}', expected '{}'",
                    entry.id, base, base_slug
                )));
            }
        }

        let stable_id = StableId::new();
        let now = now_rfc3339();
        tx.execute(
            "INSERT INTO stable_entries (id, section, base_slug, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![stable_id.to_string(), section, base_slug, now],
        )?;

        let mut links = Vec::with_capacity(members.len());
        for (entry, _, language) in members {
            tx.execute(
                "INSERT INTO entry_lang_links (stable_id, language, entry_id, needs_translation)
                 VALUES (?1, ?2, ?3, 0)",
                params![stable_id.to_string(), language, entry.id],
            )?;
            links.push(LangLink {
                stable_id: stable_id.to_string(),
                language,
                entry_id: entry.id,
                needs_translation: false,
            });
        }

        tx.commit()?;
        info!(stable_id = %stable_id, entries = links.len(), "linked existing entries");
        Ok(LinkedGroup { stable_id, links })
    }

    /// All language links of the group an entry belongs to
    ///
    /// An unlinked entry has no translations and yields an empty list.
    pub fn translations(&self, entry_id: EntryId) -> StoreResult<Vec<LangLink>> {
        load_entry(&self.conn, entry_id)?;
        match find_link(&self.conn, entry_id)? {
            Some(link) => group_links(&self.conn, &link.stable_id),
            None => Ok(Vec::new()),
        }
    }

    /// Clear the needs-translation flag of an entry
    pub fn mark_translated(&mut self, entry_id: EntryId) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE entry_lang_links SET needs_translation = 0 WHERE entry_id = ?1",
            params![entry_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("language link for entry", entry_id));
        }
        Ok(())
    }

    /// Get a translation group
    pub fn get_stable_entry(&self, id: &StableId) -> StoreResult<StableEntry> {
        self.conn
            .query_row(
                "SELECT id, section, base_slug, created_at, updated_at
                 FROM stable_entries WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(StableEntry {
                        id: row.get(0)?,
                        section: row.get(1)?,
                        base_slug: row.get(2)?,
                        created_at: parse_datetime(row.get(3)?),
                        updated_at: parse_datetime(row.get(4)?),
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("stable entry", id))
    }
}

/// Entry section column, kind and identity key for new data
fn resolve_section(section: &str, data: &Value) -> StoreResult<(String, EntryKind, String)> {
    if is_tree_section(section) {
        let mut parts = section.splitn(3, '/');
        let (Some(root), Some(category), Some(subcategory)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(StoreError::Validation(format!(
                "'{}' needs a category and sub-category, e.g. skills/<category>/<subcategory>",
                section
            )));
        };
        let key = tree_keys(root, category, subcategory, std::slice::from_ref(data))
            .pop()
            .unwrap_or_else(|| Err(StoreError::Validation("empty item".into())))?;
        return Ok((key.clone(), EntryKind::Tree, key));
    }
    if section.contains('/') || section.is_empty() {
        return Err(StoreError::Validation(format!(
            "invalid section name '{}'",
            section
        )));
    }
    Ok((section.to_string(), EntryKind::List, flat_key(section, data)?))
}

/// Recompute a list entry's identity key after its payload changed
///
/// Tree and value entries keep their key, since it encodes their position.
fn refresh_identity_key(conn: &Connection, entry: &Entry, payload: &Value) -> StoreResult<()> {
    if entry.kind != EntryKind::List {
        return Ok(());
    }
    let key = flat_key(&entry.section, payload)?;
    if entry.identity_key.as_deref() == Some(key.as_str()) {
        return Ok(());
    }
    if let Some(other) = find_entry_by_identity(conn, entry.owner_id, &entry.section, &key)? {
        if other.id != entry.id {
            return Err(StoreError::Conflict(format!(
                "entry {} already has identity key '{}'",
                other.id, key
            )));
        }
    }
    write_identity_key(conn, entry.id, &key)
}

/// Overwrite shared fields of `target` from `source`; the tag field is left
/// to the tag manager
fn copy_shared_fields(source: &Value, target: &mut Value, fields: &[&str]) {
    let (Some(source), Some(target)) = (source.as_object(), target.as_object_mut()) else {
        return;
    };
    for field in fields.iter().filter(|f| **f != TAG_FIELD) {
        match source.get(*field) {
            Some(value) => {
                target.insert(field.to_string(), value.clone());
            }
            None => {
                target.remove(*field);
            }
        }
    }
}

pub(crate) fn find_link(conn: &Connection, entry_id: EntryId) -> StoreResult<Option<LangLink>> {
    Ok(conn
        .query_row(
            "SELECT stable_id, language, entry_id, needs_translation
             FROM entry_lang_links WHERE entry_id = ?1",
            params![entry_id],
            link_from_row,
        )
        .optional()?)
}

pub(crate) fn group_links(conn: &Connection, stable_id: &str) -> StoreResult<Vec<LangLink>> {
    let mut stmt = conn.prepare(
        "SELECT stable_id, language, entry_id, needs_translation
         FROM entry_lang_links WHERE stable_id = ?1 ORDER BY language",
    )?;
    let rows = stmt.query_map(params![stable_id], link_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LangLink> {
    Ok(LangLink {
        stable_id: row.get(0)?,
        language: row.get(1)?,
        entry_id: row.get(2)?,
        needs_translation: row.get(3)?,
    })
}
