//! Document import: upsert by identity key, or overwrite whole sections

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{document_display_name, flatten_document, ItemError, TagMode};
use crate::core::config::Languages;
use crate::core::document::{list_documents, load_document, save_document, DocumentName};
use crate::core::error::{StoreError, StoreResult};
use crate::core::store::{
    delete_empty_stable_entries, delete_section_entries, ensure_owner, find_entry_by_identity,
    find_owner, insert_entry, write_payload_and_order, CvStore, NewEntry,
};
use crate::core::tags::link_names;

/// Import options
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Delete the owner's prior entries for every section in the document
    pub overwrite: bool,
    /// Where to write a copy of replaced data before an overwrite
    pub backup_dir: Option<PathBuf>,
}

/// Import statistics for one document
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub owner: String,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Entries removed by an overwrite
    pub deleted: usize,
    pub relations_added: usize,
    pub errors: Vec<ItemError>,
    pub backup: Option<PathBuf>,
}

/// Outcome of importing one file of a directory
#[derive(Debug)]
pub struct DocumentImport {
    pub path: PathBuf,
    pub result: StoreResult<ImportReport>,
}

impl CvStore {
    /// Import one document for the owner named by `name`
    ///
    /// The whole document is applied in one transaction. Per-item problems
    /// are returned in the report and do not stop the rest of the document.
    pub fn import_document(
        &mut self,
        name: &DocumentName,
        document: &Value,
        options: &ImportOptions,
    ) -> StoreResult<ImportReport> {
        let flat = flatten_document(document)?;
        let mut report = ImportReport {
            owner: name.slug.clone(),
            errors: flat.errors,
            ..Default::default()
        };

        if options.overwrite {
            if let Some(dir) = &options.backup_dir {
                report.backup = self.backup_owner(&name.slug, dir)?;
            }
        }

        let display_name = document_display_name(document).unwrap_or_else(|| name.slug.clone());

        let tx = self.conn.transaction()?;
        let owner_id = ensure_owner(
            &tx,
            &name.slug,
            &display_name,
            &name.base_slug,
            &name.language,
        )?;

        if options.overwrite {
            for section in &flat.sections {
                report.deleted += delete_section_entries(&tx, owner_id, section)?;
            }
            // Replaced entries take their language links with them
            delete_empty_stable_entries(&tx)?;
        }

        for item in &flat.items {
            let serialized = serde_json::to_string(&item.payload)?;
            let entry_id =
                match find_entry_by_identity(&tx, owner_id, &item.section, &item.identity_key)? {
                    Some(existing) => {
                        if existing.payload == serialized && existing.order_index == item.order_index
                        {
                            report.unchanged += 1;
                        } else {
                            write_payload_and_order(
                                &tx,
                                existing.id,
                                &item.payload,
                                item.order_index,
                            )?;
                            report.updated += 1;
                        }
                        existing.id
                    }
                    None => {
                        report.created += 1;
                        insert_entry(
                            &tx,
                            &NewEntry {
                                owner_id,
                                section: &item.section,
                                kind: item.kind,
                                order_index: item.order_index,
                                payload: &item.payload,
                                identity_key: Some(&item.identity_key),
                            },
                        )?
                    }
                };
            report.relations_added += link_names(&tx, entry_id, &item.tags)?;
        }

        tx.commit()?;

        info!(
            owner = %name.slug,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deleted = report.deleted,
            errors = report.errors.len(),
            "imported document"
        );
        Ok(report)
    }

    /// Write the owner's current data to a timestamped backup file
    fn backup_owner(&self, slug: &str, dir: &Path) -> StoreResult<Option<PathBuf>> {
        if find_owner(&self.conn, slug)?.is_none() {
            return Ok(None);
        }
        let export = self.export_owner(slug, TagMode::None)?;
        let path = dir.join(format!(
            "{}-{}.json",
            slug,
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        save_document(&path, &export.document)?;
        info!(owner = slug, path = %path.display(), "backed up owner data");
        Ok(Some(path))
    }
}

/// Import every document in a directory
///
/// `owner` filters by owner slug or base slug. A file that cannot be read or
/// parsed is reported in its own result and does not stop the others.
pub fn import_dir(
    store: &mut CvStore,
    dir: &Path,
    owner: Option<&str>,
    languages: &Languages,
    options: &ImportOptions,
) -> StoreResult<Vec<DocumentImport>> {
    let mut results = Vec::new();

    for path in list_documents(dir)? {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let name = DocumentName::parse(&stem, &languages.all, &languages.default);
        if let Some(filter) = owner {
            if name.slug != filter && name.base_slug != filter {
                continue;
            }
        }

        let result = load_document(&path).and_then(|doc| store.import_document(&name, &doc, options));
        if let Err(err) = &result {
            warn!(path = %path.display(), error = %err, "document import failed");
        }
        results.push(DocumentImport { path, result });
    }

    if results.is_empty() {
        if let Some(filter) = owner {
            return Err(StoreError::not_found("document for owner", filter));
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::EntryKind;
    use serde_json::json;
    use tempfile::tempdir;

    fn jane() -> DocumentName {
        DocumentName::parse("jane", &["en".to_string()], "en")
    }

    fn sample() -> Value {
        json!({
            "personal_info": {"name": "Jane Doe"},
            "projects": [
                {"title": "CV Engine", "url": "http://a", "type_key": ["Full CV", "Programming"]},
                {"title": "Thesis", "url": "http://b", "type_key": "Academic"}
            ],
            "skills": {
                "Computer Science": {
                    "AI": [
                        {"short_name": "ML", "long_name": "Machine Learning"},
                        {"short_name": "ML", "long_name": "Meta Language"}
                    ]
                }
            }
        })
    }

    fn relation_snapshot(store: &CvStore) -> Vec<(i64, i64)> {
        let mut stmt = store
            .conn
            .prepare("SELECT entry_id, tag_id FROM entry_tags ORDER BY entry_id, tag_id")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        rows.map(Result::unwrap).collect()
    }

    fn entry_ids(store: &CvStore) -> Vec<(String, i64)> {
        let owner = store.get_owner("jane").unwrap();
        store
            .entries_for_owner(owner.id)
            .unwrap()
            .into_iter()
            .map(|e| (e.identity_key.unwrap(), e.id))
            .collect()
    }

    #[test]
    fn test_import_is_idempotent() {
        let mut store = CvStore::open_in_memory().unwrap();
        let first = store
            .import_document(&jane(), &sample(), &ImportOptions::default())
            .unwrap();
        assert_eq!(first.created, 5);
        assert_eq!(first.relations_added, 3);
        let ids_before = entry_ids(&store);
        let relations_before = relation_snapshot(&store);

        let second = store
            .import_document(&jane(), &sample(), &ImportOptions::default())
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 5);
        assert_eq!(second.relations_added, 0);
        assert_eq!(entry_ids(&store), ids_before);
        assert_eq!(relation_snapshot(&store), relations_before);
    }

    #[test]
    fn test_duplicate_skill_names_map_back_to_same_entries() {
        let mut store = CvStore::open_in_memory().unwrap();
        store
            .import_document(&jane(), &sample(), &ImportOptions::default())
            .unwrap();
        let owner = store.get_owner("jane").unwrap();
        let skills: Vec<_> = store
            .entries_for_owner(owner.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::Tree)
            .map(|e| (e.id, e.parse_payload().unwrap()["long_name"].clone()))
            .collect();
        assert_eq!(skills.len(), 2);

        // Swap the two skills in the document and re-import
        let mut doc = sample();
        let list = doc["skills"]["Computer Science"]["AI"].as_array_mut().unwrap();
        list.swap(0, 1);
        store
            .import_document(&jane(), &doc, &ImportOptions::default())
            .unwrap();

        for (id, long_name) in skills {
            let entry = store.get_entry(id).unwrap();
            assert_eq!(entry.parse_payload().unwrap()["long_name"], long_name);
        }
    }

    #[test]
    fn test_upsert_updates_changed_payload() {
        let mut store = CvStore::open_in_memory().unwrap();
        store
            .import_document(&jane(), &sample(), &ImportOptions::default())
            .unwrap();

        let mut doc = sample();
        doc["projects"][0]["description"] = json!("now with a description");
        let report = store
            .import_document(&jane(), &doc, &ImportOptions::default())
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
    }

    #[test]
    fn test_overwrite_replaces_sections_and_writes_backup() {
        let tmp = tempdir().unwrap();
        let mut store = CvStore::open_in_memory().unwrap();
        store
            .import_document(&jane(), &sample(), &ImportOptions::default())
            .unwrap();

        let replacement = json!({"projects": [{"title": "Only", "url": "http://c"}]});
        let options = ImportOptions {
            overwrite: true,
            backup_dir: Some(tmp.path().to_path_buf()),
        };
        let report = store.import_document(&jane(), &replacement, &options).unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.created, 1);

        let backup = report.backup.expect("backup written");
        let saved = load_document(&backup).unwrap();
        assert_eq!(saved["projects"].as_array().unwrap().len(), 2);

        // Sections absent from the replacement document are untouched
        let owner = store.get_owner("jane").unwrap();
        assert_eq!(store.entries_for_owner(owner.id).unwrap().len(), 4);
    }

    #[test]
    fn test_overwrite_drops_emptied_translation_groups() {
        let languages = Languages::new("en", &["en".to_string(), "de".to_string()]);
        let mut store = CvStore::open_in_memory().unwrap();
        let group = store
            .create_with_sync(
                "jane",
                "projects",
                &json!({"title": "Linked", "url": "http://l"}),
                "en",
                &languages,
            )
            .unwrap();
        let de = group.links.iter().find(|l| l.language == "de").unwrap().entry_id;

        let replacement = json!({"projects": [{"title": "Only", "url": "http://c"}]});
        let options = ImportOptions {
            overwrite: true,
            backup_dir: None,
        };
        store.import_document(&jane(), &replacement, &options).unwrap();

        // The German variant lost its partner but keeps its group
        assert_eq!(store.translations(de).unwrap().len(), 1);
        let report = store.doctor().unwrap();
        assert!(report.empty_stable_entries.is_empty());
        assert!(report.is_healthy());

        // Replacing the German projects too leaves no group behind
        let jane_de = DocumentName::parse("jane_de", &languages.all, "en");
        store.import_document(&jane_de, &replacement, &options).unwrap();
        assert!(matches!(
            store.translations(de),
            Err(StoreError::NotFound { .. })
        ));
        let stable: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM stable_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stable, 0);
        assert!(store.doctor().unwrap().is_healthy());
    }

    #[test]
    fn test_item_errors_do_not_abort_import() {
        let mut store = CvStore::open_in_memory().unwrap();
        let doc = json!({"projects": [null, {"title": "Ok", "url": "u"}]});
        let report = store
            .import_document(&jane(), &doc, &ImportOptions::default())
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_import_dir_filters_by_base_slug() {
        let tmp = tempdir().unwrap();
        save_document(&tmp.path().join("jane.json"), &sample()).unwrap();
        save_document(&tmp.path().join("jane_de.json"), &sample()).unwrap();
        save_document(&tmp.path().join("bob.json"), &sample()).unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{").unwrap();

        let languages = Languages {
            default: "en".into(),
            all: vec!["en".into(), "de".into()],
        };
        let mut store = CvStore::open_in_memory().unwrap();
        let results = import_dir(
            &mut store,
            tmp.path(),
            Some("jane"),
            &languages,
            &ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.result.is_ok()));
        assert_eq!(store.get_owner("jane_de").unwrap().language, "de");
        assert_eq!(store.get_owner("jane").unwrap().name, "Jane Doe");

        let all = import_dir(&mut store, tmp.path(), None, &languages, &ImportOptions::default())
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.iter().filter(|r| r.result.is_err()).count(), 1);
    }
}
