//! Document export with optional tag application

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::document::{embedded_tags, has_tag_field, merge_tag_order};
use crate::core::error::{StoreError, StoreResult};
use crate::core::identity::split_tree_path;
use crate::core::sections::TAG_FIELD;
use crate::core::store::{find_owner, CvStore, Entry, EntryId, EntryKind};
use crate::core::tags::relations_for_owner;

/// How the relation table is applied to exported payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagMode {
    /// Payloads as stored, with the tag field as it was imported
    #[default]
    None,
    /// Only payloads that already carry a tag field get current relations
    Apply,
    /// Every object payload gets current relations, empty list when none
    ApplyAll,
}

impl fmt::Display for TagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagMode::None => write!(f, "none"),
            TagMode::Apply => write!(f, "apply"),
            TagMode::ApplyAll => write!(f, "apply-all"),
        }
    }
}

impl FromStr for TagMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(TagMode::None),
            "apply" => Ok(TagMode::Apply),
            "apply-all" | "all" => Ok(TagMode::ApplyAll),
            _ => Err(format!(
                "Invalid tag mode: {}. Use none, apply, or apply-all",
                s
            )),
        }
    }
}

/// An entry left out of an export
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub entry_id: EntryId,
    pub section: String,
    pub reason: String,
}

/// Rebuilt document plus what did not make it in
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub owner: String,
    pub document: Value,
    pub entries_exported: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl CvStore {
    /// Rebuild an owner's document from stored entries
    ///
    /// Read-only. An entry whose payload cannot be parsed, or whose shape
    /// clashes with an earlier entry of the same section, is reported in
    /// `skipped` and the rest of the document is still produced.
    pub fn export_owner(&self, slug: &str, mode: TagMode) -> StoreResult<ExportReport> {
        let owner =
            find_owner(&self.conn, slug)?.ok_or_else(|| StoreError::not_found("owner", slug))?;
        let entries = self.entries_for_owner(owner.id)?;
        let relations = if mode == TagMode::None {
            Default::default()
        } else {
            relations_for_owner(&self.conn, owner.id)?
        };

        let mut root = Map::new();
        let mut report = ExportReport {
            owner: owner.slug.clone(),
            document: Value::Null,
            entries_exported: 0,
            skipped: Vec::new(),
        };

        for entry in &entries {
            let mut payload = match entry.parse_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(entry = entry.id, "skipping entry with invalid payload");
                    report.skipped.push(skipped(entry, err));
                    continue;
                }
            };

            let original = match entry.parse_original_tags() {
                Ok(original) => original,
                Err(err) => {
                    warn!(entry = entry.id, "skipping entry with invalid original tags");
                    report.skipped.push(skipped(entry, err));
                    continue;
                }
            };

            if mode == TagMode::None {
                restore_original_tags(&mut payload, original);
            } else {
                let related = relations.get(&entry.id).map(Vec::as_slice).unwrap_or(&[]);
                apply_tags(&mut payload, original.is_some(), related, mode);
            }

            match place(&mut root, entry, payload) {
                Ok(()) => report.entries_exported += 1,
                Err(reason) => report.skipped.push(skipped(entry, reason)),
            }
        }

        debug!(
            owner = slug,
            mode = %mode,
            exported = report.entries_exported,
            skipped = report.skipped.len(),
            "exported owner"
        );
        report.document = Value::Object(root);
        Ok(report)
    }
}

fn skipped(entry: &Entry, reason: impl fmt::Display) -> SkippedEntry {
    SkippedEntry {
        entry_id: entry.id,
        section: entry.section.clone(),
        reason: reason.to_string(),
    }
}

/// Put back the tag field the entry was imported with
fn restore_original_tags(payload: &mut Value, original: Option<Value>) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    match original {
        Some(tags) => {
            obj.insert(TAG_FIELD.to_string(), tags);
        }
        None => {
            obj.remove(TAG_FIELD);
        }
    }
}

/// Rewrite the payload tag field from current relations according to `mode`
///
/// `had_field` tells whether the entry was imported with a tag field.
fn apply_tags(payload: &mut Value, had_field: bool, related: &[String], mode: TagMode) {
    let applies = match mode {
        TagMode::None => false,
        TagMode::Apply => had_field || has_tag_field(payload),
        TagMode::ApplyAll => payload.is_object(),
    };
    if !applies {
        return;
    }

    let names = merge_tag_order(&embedded_tags(payload), related);
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    if names.is_empty() && mode == TagMode::Apply {
        obj.remove(TAG_FIELD);
    } else {
        obj.insert(
            TAG_FIELD.to_string(),
            Value::Array(names.into_iter().map(Value::String).collect()),
        );
    }
}

/// Put one payload at its place in the document being rebuilt
fn place(root: &mut Map<String, Value>, entry: &Entry, payload: Value) -> Result<(), String> {
    match entry.kind {
        EntryKind::Value => {
            if root.contains_key(&entry.section) {
                return Err(format!("section '{}' is already populated", entry.section));
            }
            root.insert(entry.section.clone(), payload);
        }
        EntryKind::List => {
            let slot = root
                .entry(entry.section.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Some(list) = slot.as_array_mut() else {
                return Err(format!("section '{}' is not a list", entry.section));
            };
            list.push(payload);
        }
        EntryKind::Tree => {
            let (section, category, subcategory) = split_tree_path(&entry.section)
                .ok_or_else(|| format!("malformed tree path '{}'", entry.section))?;
            let slot = root
                .entry(section.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            let list = slot
                .as_object_mut()
                .map(|categories| {
                    categories
                        .entry(category)
                        .or_insert_with(|| Value::Object(Map::new()))
                })
                .and_then(Value::as_object_mut)
                .map(|subcategories| {
                    subcategories
                        .entry(subcategory)
                        .or_insert_with(|| Value::Array(Vec::new()))
                })
                .and_then(Value::as_array_mut)
                .ok_or_else(|| format!("section '{}' is not a category tree", section))?;
            list.push(payload);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::DocumentName;
    use crate::core::pipeline::ImportOptions;
    use rusqlite::params;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "personal_info": {"name": "Jane Doe", "email": "jane@example.com"},
            "projects": [
                {"title": "CV Engine", "url": "http://a", "type_key": ["Full CV", "Programming"]},
                {"title": "Thesis", "url": "http://b"},
                {"title": "Site", "url": "http://c", "type_key": "Website"}
            ],
            "skills": {
                "Computer Science": {
                    "AI": [
                        {"short_name": "ML", "long_name": "Machine Learning"},
                        {"short_name": "ML", "long_name": "Meta Language"}
                    ]
                },
                "Soft Skills": {
                    "Team": [{"short_name": "Mentoring"}]
                }
            },
            "summary": "Engineer"
        })
    }

    fn imported() -> CvStore {
        let mut store = CvStore::open_in_memory().unwrap();
        let name = DocumentName::parse("jane", &["en".to_string()], "en");
        store
            .import_document(&name, &sample(), &ImportOptions::default())
            .unwrap();
        store
    }

    fn project_id(store: &CvStore, title: &str) -> EntryId {
        let owner = store.get_owner("jane").unwrap();
        store
            .entries_for_owner(owner.id)
            .unwrap()
            .into_iter()
            .find(|e| e.parse_payload().unwrap()["title"] == json!(title))
            .unwrap()
            .id
    }

    #[test]
    fn test_default_export_round_trips_document() {
        let store = imported();
        let report = store.export_owner("jane", TagMode::None).unwrap();
        assert!(report.skipped.is_empty());
        assert_eq!(report.entries_exported, 8);

        // Single-string tag fields are preserved exactly as imported
        assert_eq!(report.document, sample());
    }

    #[test]
    fn test_apply_reflects_deleted_tag() {
        let mut store = imported();
        store.delete_tag("Programming").unwrap();

        // Re-add a relation without touching the payload to see apply at work
        let tag = store.create_tag("Zeta", None).unwrap();
        let id = project_id(&store, "CV Engine");
        store
            .conn
            .execute(
                "INSERT INTO entry_tags (entry_id, tag_id) VALUES (?1, ?2)",
                params![id, tag.id],
            )
            .unwrap();

        let plain = store.export_owner("jane", TagMode::None).unwrap();
        assert_eq!(plain.document["projects"][0]["type_key"], json!(["Full CV"]));

        let applied = store.export_owner("jane", TagMode::Apply).unwrap();
        assert_eq!(
            applied.document["projects"][0]["type_key"],
            json!(["Full CV", "Zeta"])
        );
        // Entries without a tag field stay untouched
        assert!(applied.document["projects"][1].get("type_key").is_none());
    }

    #[test]
    fn test_default_export_ignores_later_relation_changes() {
        let mut store = imported();
        let engine = project_id(&store, "CV Engine");
        let thesis = project_id(&store, "Thesis");

        store.assign_tag(engine, "Y").unwrap();
        store.unassign_tag(engine, "Full CV").unwrap();
        store.assign_tag(thesis, "Y").unwrap();
        store.rename_tag("Programming", "Coding").unwrap();

        let plain = store.export_owner("jane", TagMode::None).unwrap();
        assert_eq!(plain.document, sample());

        let applied = store.export_owner("jane", TagMode::Apply).unwrap();
        assert_eq!(
            applied.document["projects"][0]["type_key"],
            json!(["Y", "Coding"])
        );
        assert_eq!(applied.document["projects"][1]["type_key"], json!(["Y"]));
    }

    #[test]
    fn test_reimport_resets_original_tags() {
        let mut store = imported();
        let engine = project_id(&store, "CV Engine");
        store.assign_tag(engine, "Y").unwrap();

        let mut doc = sample();
        doc["projects"][0]["type_key"] = json!(["Full CV", "Programming", "Y"]);
        let name = DocumentName::parse("jane", &["en".to_string()], "en");
        store
            .import_document(&name, &doc, &ImportOptions::default())
            .unwrap();

        let plain = store.export_owner("jane", TagMode::None).unwrap();
        assert_eq!(plain.document, doc);
    }

    #[test]
    fn test_apply_drops_emptied_field_and_apply_all_keeps_it() {
        let store = imported();
        let id = project_id(&store, "Site");
        store
            .conn
            .execute("DELETE FROM entry_tags WHERE entry_id = ?1", params![id])
            .unwrap();

        let applied = store.export_owner("jane", TagMode::Apply).unwrap();
        assert!(applied.document["projects"][2].get("type_key").is_none());

        let all = store.export_owner("jane", TagMode::ApplyAll).unwrap();
        assert_eq!(all.document["projects"][1]["type_key"], json!([]));
        assert_eq!(all.document["projects"][2]["type_key"], json!([]));
        assert_eq!(all.document["personal_info"]["type_key"], json!([]));
        // Scalar sections cannot carry tags
        assert_eq!(all.document["summary"], json!("Engineer"));
    }

    #[test]
    fn test_export_skips_broken_payloads() {
        let store = imported();
        let id = project_id(&store, "Thesis");
        store
            .conn
            .execute("UPDATE entries SET payload = '{oops' WHERE id = ?1", params![id])
            .unwrap();

        let report = store.export_owner("jane", TagMode::None).unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].entry_id, id);
        assert_eq!(report.document["projects"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_export_unknown_owner() {
        let store = CvStore::open_in_memory().unwrap();
        assert!(matches!(
            store.export_owner("ghost", TagMode::None),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_tag_mode_parse() {
        assert_eq!("apply-all".parse::<TagMode>().unwrap(), TagMode::ApplyAll);
        assert_eq!("APPLY".parse::<TagMode>().unwrap(), TagMode::Apply);
        assert!("sometimes".parse::<TagMode>().is_err());
    }
}
