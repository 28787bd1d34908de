//! Read-only store diagnostics
//!
//! Data problems are reported as findings, never raised as errors. The only
//! repair path is [`CvStore::cleanup_orphan_references`].

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use crate::core::document::embedded_tags;
use crate::core::error::StoreResult;
use crate::core::store::{CvStore, EntryId, OwnerId, TagId};

/// An entry whose owner row is gone
#[derive(Debug, Clone, Serialize)]
pub struct OrphanEntry {
    pub entry_id: EntryId,
    pub owner_id: OwnerId,
}

/// A relation row pointing at a missing tag or entry
#[derive(Debug, Clone, Serialize)]
pub struct DanglingRelation {
    pub entry_id: EntryId,
    pub tag_id: TagId,
    pub missing: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidPayload {
    pub entry_id: EntryId,
    pub error: String,
}

/// A language link whose entry no longer exists
#[derive(Debug, Clone, Serialize)]
pub struct DanglingLink {
    pub stable_id: String,
    pub language: String,
    pub entry_id: EntryId,
}

/// An entry whose embedded tags and relations disagree
#[derive(Debug, Clone, Serialize)]
pub struct TagDrift {
    pub entry_id: EntryId,
    pub embedded: Vec<String>,
    pub related: Vec<String>,
}

/// Findings of one diagnostics run
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    pub orphan_entries: Vec<OrphanEntry>,
    pub dangling_relations: Vec<DanglingRelation>,
    /// Groups of tag names that differ only by case
    pub case_duplicate_tags: Vec<Vec<String>>,
    pub missing_identity_keys: Vec<EntryId>,
    pub invalid_payloads: Vec<InvalidPayload>,
    pub empty_stable_entries: Vec<String>,
    pub dangling_links: Vec<DanglingLink>,
    /// Informational, not counted as a problem
    pub tag_drift: Vec<TagDrift>,
}

impl DoctorReport {
    /// True when there is nothing but informational drift
    pub fn is_healthy(&self) -> bool {
        self.problem_count() == 0
    }

    pub fn problem_count(&self) -> usize {
        self.orphan_entries.len()
            + self.dangling_relations.len()
            + self.case_duplicate_tags.len()
            + self.missing_identity_keys.len()
            + self.invalid_payloads.len()
            + self.empty_stable_entries.len()
            + self.dangling_links.len()
    }
}

impl CvStore {
    /// Scan the store for consistency problems
    pub fn doctor(&self) -> StoreResult<DoctorReport> {
        let mut report = DoctorReport::default();

        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.owner_id FROM entries e
             LEFT JOIN owners o ON o.id = e.owner_id
             WHERE o.id IS NULL ORDER BY e.id",
        )?;
        report.orphan_entries = stmt
            .query_map([], |row| {
                Ok(OrphanEntry {
                    entry_id: row.get(0)?,
                    owner_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT et.entry_id, et.tag_id, t.id IS NULL, e.id IS NULL
             FROM entry_tags et
             LEFT JOIN tags t ON t.id = et.tag_id
             LEFT JOIN entries e ON e.id = et.entry_id
             WHERE t.id IS NULL OR e.id IS NULL
             ORDER BY et.entry_id, et.tag_id",
        )?;
        report.dangling_relations = stmt
            .query_map([], |row| {
                let tag_missing: bool = row.get(2)?;
                let entry_missing: bool = row.get(3)?;
                Ok(DanglingRelation {
                    entry_id: row.get(0)?,
                    tag_id: row.get(1)?,
                    missing: match (tag_missing, entry_missing) {
                        (true, true) => "tag and entry",
                        (true, false) => "tag",
                        _ => "entry",
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_folded: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut stmt = self.conn.prepare("SELECT name FROM tags ORDER BY name")?;
        for name in stmt.query_map([], |row| row.get::<_, String>(0))? {
            let name = name?;
            by_folded.entry(name.to_lowercase()).or_default().push(name);
        }
        report.case_duplicate_tags = by_folded
            .into_values()
            .filter(|names| names.len() > 1)
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT stable_id, language, entry_id FROM entry_lang_links l
             WHERE NOT EXISTS (SELECT 1 FROM entries e WHERE e.id = l.entry_id)
             ORDER BY stable_id, language",
        )?;
        report.dangling_links = stmt
            .query_map([], |row| {
                Ok(DanglingLink {
                    stable_id: row.get(0)?,
                    language: row.get(1)?,
                    entry_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT s.id FROM stable_entries s
             WHERE NOT EXISTS (SELECT 1 FROM entry_lang_links l WHERE l.stable_id = s.id)
             ORDER BY s.id",
        )?;
        report.empty_stable_entries = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let related = self.relation_sets()?;
        let mut stmt = self
            .conn
            .prepare("SELECT id, payload, identity_key FROM entries ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, EntryId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (entry_id, payload, identity_key) = row?;
            if identity_key.map_or(true, |k| k.trim().is_empty()) {
                report.missing_identity_keys.push(entry_id);
            }
            match serde_json::from_str::<Value>(&payload) {
                Ok(payload) => {
                    let embedded: BTreeSet<String> = embedded_tags(&payload).into_iter().collect();
                    let relations = related.get(&entry_id).cloned().unwrap_or_default();
                    if embedded != relations {
                        report.tag_drift.push(TagDrift {
                            entry_id,
                            embedded: embedded.into_iter().collect(),
                            related: relations.into_iter().collect(),
                        });
                    }
                }
                Err(e) => report.invalid_payloads.push(InvalidPayload {
                    entry_id,
                    error: e.to_string(),
                }),
            }
        }

        tracing::debug!(problems = report.problem_count(), "doctor finished");
        Ok(report)
    }

    fn relation_sets(&self) -> StoreResult<BTreeMap<EntryId, BTreeSet<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT et.entry_id, t.name FROM entry_tags et JOIN tags t ON t.id = et.tag_id",
        )?;
        let mut map: BTreeMap<EntryId, BTreeSet<String>> = BTreeMap::new();
        for row in stmt.query_map(params![], |row| {
            Ok((row.get::<_, EntryId>(0)?, row.get::<_, String>(1)?))
        })? {
            let (entry_id, name) = row?;
            map.entry(entry_id).or_default().insert(name);
        }
        Ok(map)
    }
}
