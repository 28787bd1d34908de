//! Import/export pipeline between document trees and the entry store
//!
//! Documents are flattened into [`FlatItem`]s (one per stored entry) with
//! their identity keys already resolved. Import upserts those items, diff
//! compares them against stored state, and export rebuilds the tree.

mod diff;
mod export;
mod import;

pub use diff::DocumentDiff;
pub use export::{ExportReport, SkippedEntry, TagMode};
pub use import::{import_dir, DocumentImport, ImportOptions, ImportReport};

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::core::document::embedded_tags;
use crate::core::error::{StoreError, StoreResult};
use crate::core::identity::{flat_key, tree_keys};
use crate::core::sections::is_tree_section;
use crate::core::store::EntryKind;

/// One document node destined for one entry
#[derive(Debug, Clone)]
pub struct FlatItem {
    /// Section column (a synthetic path for tree leaves)
    pub section: String,
    pub kind: EntryKind,
    pub identity_key: String,
    pub order_index: i64,
    pub payload: Value,
    /// Tag names embedded in the payload
    pub tags: Vec<String>,
}

/// A per-item failure collected during a batch operation
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    /// Where in the document the item sits, e.g. `projects[3]`
    pub location: String,
    pub message: String,
}

impl ItemError {
    fn new(location: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self {
            location: location.into(),
            message: err.to_string(),
        }
    }
}

/// Result of flattening one document
#[derive(Debug, Default)]
pub struct Flattened {
    pub items: Vec<FlatItem>,
    pub errors: Vec<ItemError>,
    /// Top-level sections present in the document, in order
    pub sections: Vec<String>,
}

/// Flatten a document into entry-sized items
///
/// Only a non-object root aborts; every other problem is recorded against
/// the offending item and the rest of the document is still processed.
pub fn flatten_document(document: &Value) -> StoreResult<Flattened> {
    let root = document.as_object().ok_or_else(|| {
        StoreError::Validation("document root must be an object with one key per section".into())
    })?;

    let mut out = Flattened::default();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut order: i64 = 0;

    let mut push = |out: &mut Flattened, location: String, item: FlatItem| {
        if seen.insert((item.section.clone(), item.identity_key.clone())) {
            out.items.push(item);
        } else {
            out.errors.push(ItemError::new(
                location,
                StoreError::Conflict(format!(
                    "identity key '{}' is used by more than one item",
                    item.identity_key
                )),
            ));
        }
    };

    for (section, value) in root {
        out.sections.push(section.clone());

        if is_tree_section(section) {
            let Some(categories) = value.as_object() else {
                out.errors.push(ItemError::new(
                    section.as_str(),
                    StoreError::Validation("tree section must map categories to sub-categories".into()),
                ));
                continue;
            };
            for (category, subcategories) in categories {
                let Some(subcategories) = subcategories.as_object() else {
                    out.errors.push(ItemError::new(
                        format!("{}/{}", section, category),
                        StoreError::Validation("category must map sub-categories to item lists".into()),
                    ));
                    continue;
                };
                for (subcategory, items) in subcategories {
                    let location = format!("{}/{}/{}", section, category, subcategory);
                    let Some(items) = items.as_array() else {
                        out.errors.push(ItemError::new(
                            location,
                            StoreError::Validation("sub-category must be a list of items".into()),
                        ));
                        continue;
                    };
                    let keys = tree_keys(section, category, subcategory, items);
                    for (index, (item, key)) in items.iter().zip(keys).enumerate() {
                        let item_location = format!("{}[{}]", location, index);
                        let order_index = order;
                        order += 1;
                        match key {
                            Ok(key) => push(
                                &mut out,
                                item_location,
                                FlatItem {
                                    section: key.clone(),
                                    kind: EntryKind::Tree,
                                    identity_key: key,
                                    order_index,
                                    tags: embedded_tags(item),
                                    payload: item.clone(),
                                },
                            ),
                            Err(err) => out.errors.push(ItemError::new(item_location, err)),
                        }
                    }
                }
            }
            continue;
        }

        match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    let location = format!("{}[{}]", section, index);
                    let order_index = order;
                    order += 1;
                    match flat_key(section, item) {
                        Ok(key) => push(
                            &mut out,
                            location,
                            FlatItem {
                                section: section.clone(),
                                kind: EntryKind::List,
                                identity_key: key,
                                order_index,
                                tags: embedded_tags(item),
                                payload: item.clone(),
                            },
                        ),
                        Err(err) => out.errors.push(ItemError::new(location, err)),
                    }
                }
            }
            other => {
                let order_index = order;
                order += 1;
                push(
                    &mut out,
                    section.clone(),
                    FlatItem {
                        section: section.clone(),
                        kind: EntryKind::Value,
                        identity_key: section.clone(),
                        order_index,
                        tags: embedded_tags(other),
                        payload: other.clone(),
                    },
                );
            }
        }
    }

    Ok(out)
}

/// Display name of the CV subject, if the document carries one
pub fn document_display_name(document: &Value) -> Option<String> {
    ["personal_info", "basics", "personal"]
        .iter()
        .filter_map(|key| document.get(*key))
        .chain(std::iter::once(document))
        .find_map(|node| node.get("name").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_mixed_document() {
        let doc = json!({
            "personal_info": {"name": "Jane Doe"},
            "projects": [
                {"title": "A", "url": "http://a", "type_key": ["Full CV"]},
                {"title": "B", "url": "http://b"}
            ],
            "skills": {
                "Programming": {
                    "Languages": [{"short_name": "Rust"}, {"short_name": "Go"}]
                }
            }
        });
        let flat = flatten_document(&doc).unwrap();
        assert!(flat.errors.is_empty());
        assert_eq!(flat.sections, vec!["personal_info", "projects", "skills"]);
        assert_eq!(flat.items.len(), 5);

        assert_eq!(flat.items[0].kind, EntryKind::Value);
        assert_eq!(flat.items[1].tags, vec!["Full CV"]);
        assert_eq!(flat.items[3].section, "skills/Programming/Languages/Rust");
        let orders: Vec<i64> = flat.items.iter().map(|i| i.order_index).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_flatten_collects_item_errors() {
        let doc = json!({
            "projects": [null, {"title": "A", "url": "u"}, {"title": "A", "url": "u"}],
            "skills": ["not", "a", "tree"]
        });
        let flat = flatten_document(&doc).unwrap();
        assert_eq!(flat.items.len(), 1);
        assert_eq!(flat.errors.len(), 3);
        assert_eq!(flat.errors[0].location, "projects[0]");
        assert!(flat.errors[1].message.contains("conflict"));
        assert_eq!(flat.errors[2].location, "skills");
    }

    #[test]
    fn test_flatten_rejects_non_object_root() {
        assert!(matches!(
            flatten_document(&json!([1, 2])),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_display_name_lookup() {
        assert_eq!(
            document_display_name(&json!({"personal_info": {"name": " Jane "}})),
            Some("Jane".to_string())
        );
        assert_eq!(document_display_name(&json!({"projects": []})), None);
    }
}
