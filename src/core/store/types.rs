//! Store type definitions
//!
//! Row structs for owners, entries, tags and language links.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::error::{StoreError, StoreResult};

pub type OwnerId = i64;
pub type EntryId = i64;
pub type TagId = i64;

/// Shape of the document node an entry was flattened from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Item of a top-level array
    List,
    /// Leaf of a category / sub-category tree
    Tree,
    /// A whole top-level scalar or object section
    Value,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::List => "list",
            EntryKind::Tree => "tree",
            EntryKind::Value => "value",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "list" => Some(EntryKind::List),
            "tree" => Some(EntryKind::Tree),
            "value" => Some(EntryKind::Value),
            _ => None,
        }
    }
}

/// A CV subject
#[derive(Debug, Clone, Serialize)]
pub struct Owner {
    pub id: OwnerId,
    pub slug: String,
    pub name: String,
    pub base_slug: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// Owner listing row
#[derive(Debug, Clone, Serialize)]
pub struct OwnerSummary {
    pub slug: String,
    pub name: String,
    pub language: String,
    pub entry_count: usize,
}

/// One stored entry with its raw payload text
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: EntryId,
    pub owner_id: OwnerId,
    pub owner_slug: String,
    pub section: String,
    pub kind: EntryKind,
    pub order_index: i64,
    pub payload: String,
    pub identity_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tag field as it was when the entry was imported or created, as JSON
    pub original_tags: Option<String>,
}

impl Entry {
    /// Parse the stored payload, reporting an integrity error on failure
    pub fn parse_payload(&self) -> StoreResult<Value> {
        serde_json::from_str(&self.payload).map_err(|e| {
            StoreError::Integrity(format!("entry {} has an invalid payload: {}", self.id, e))
        })
    }

    /// Parse the original tag field, `None` when the entry had none
    pub fn parse_original_tags(&self) -> StoreResult<Option<Value>> {
        self.original_tags
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| {
                StoreError::Integrity(format!(
                    "entry {} has invalid original tags: {}",
                    self.id, e
                ))
            })
    }
}

/// Values needed to insert a new entry
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub owner_id: OwnerId,
    pub section: &'a str,
    pub kind: EntryKind,
    pub order_index: i64,
    pub payload: &'a Value,
    pub identity_key: Option<&'a str>,
}

/// A catalog tag
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tag listing row with usage count
#[derive(Debug, Clone, Serialize)]
pub struct TagUsage {
    pub name: String,
    pub description: Option<String>,
    pub entry_count: usize,
}

/// Language-independent group of translated entries
#[derive(Debug, Clone, Serialize)]
pub struct StableEntry {
    pub id: String,
    pub section: String,
    pub base_slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Link from a stable group to one language variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LangLink {
    pub stable_id: String,
    pub language: String,
    pub entry_id: EntryId,
    pub needs_translation: bool,
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub owners: usize,
    pub entries: usize,
    pub tags: usize,
    pub relations: usize,
    pub stable_entries: usize,
    pub db_size_bytes: u64,
}
