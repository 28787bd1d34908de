//! Read-only comparison between a document and stored state

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use super::{flatten_document, ItemError};
use crate::core::error::StoreResult;
use crate::core::store::{find_owner, CvStore};

/// What an import of the document would change
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentDiff {
    pub owner: String,
    /// The owner does not exist yet
    pub new_owner: bool,
    /// Identity keys only in the document
    pub added: Vec<String>,
    /// Identity keys whose payload differs
    pub changed: Vec<String>,
    /// Identity keys stored under the document's sections but absent from it
    pub removed: Vec<String>,
    pub unchanged: usize,
    pub errors: Vec<ItemError>,
}

impl DocumentDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

impl CvStore {
    /// Compare a document against what is stored for `slug`
    ///
    /// Payloads are compared as parsed JSON, so formatting and key order do
    /// not count as changes. Stored entries in sections the document does
    /// not mention are not reported as removed.
    pub fn diff_document(&self, slug: &str, document: &Value) -> StoreResult<DocumentDiff> {
        let flat = flatten_document(document)?;
        let mut diff = DocumentDiff {
            owner: slug.to_string(),
            errors: flat.errors,
            ..Default::default()
        };

        let Some(owner) = find_owner(&self.conn, slug)? else {
            diff.new_owner = true;
            diff.added = flat.items.into_iter().map(|i| i.identity_key).collect();
            return Ok(diff);
        };

        let stored = self.entries_for_owner(owner.id)?;
        let mut matched: HashSet<i64> = HashSet::new();

        for item in &flat.items {
            let existing = stored.iter().find(|e| {
                e.section == item.section && e.identity_key.as_deref() == Some(&item.identity_key)
            });
            match existing {
                None => diff.added.push(item.identity_key.clone()),
                Some(entry) => {
                    matched.insert(entry.id);
                    // An unparsable stored payload always counts as changed
                    let same = entry
                        .parse_payload()
                        .map(|payload| payload == item.payload)
                        .unwrap_or(false);
                    if same {
                        diff.unchanged += 1;
                    } else {
                        diff.changed.push(item.identity_key.clone());
                    }
                }
            }
        }

        let sections: HashSet<&str> = flat.sections.iter().map(String::as_str).collect();
        for entry in &stored {
            let root = entry.section.split('/').next().unwrap_or(&entry.section);
            if sections.contains(root) && !matched.contains(&entry.id) {
                diff.removed.push(
                    entry
                        .identity_key
                        .clone()
                        .unwrap_or_else(|| format!("{}#{}", entry.section, entry.id)),
                );
            }
        }

        Ok(diff)
    }
}
