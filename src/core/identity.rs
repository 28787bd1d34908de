//! Identity keys for stored entries and stable ids for translation groups
//!
//! An identity key is derived from an entry's content so that re-importing
//! the same document maps every item back onto the entry it created the
//! first time. Keys are unique within `(owner, section)`.
//!
//! Callers should be aware that changing an identity-contributing field
//! (for example a project's title or URL) produces a new key, so the next
//! import creates a new entry instead of updating the old one. This is
//! accepted policy.
//!
//! Flat sections: `<section>:<field1>|<field2>|...` using the fields listed
//! in [`crate::core::sections`]. Items without usable identity fields fall
//! back to a content hash.
//!
//! Tree sections: `<section>/<category>/<subcategory>/<skill key>` with
//! percent-encoded path components.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ulid::Ulid;

use crate::core::error::{StoreError, StoreResult};
use crate::core::sections::{self, TAG_FIELD};

/// Prefix of every stable id
const STABLE_PREFIX: &str = "STB";

/// Language-independent identifier for a group of translated entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StableId(Ulid);

impl StableId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        s.parse()
    }
}

impl Default for StableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", STABLE_PREFIX, self.0)
    }
}

impl FromStr for StableId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, ulid_str) = s
            .split_once('-')
            .ok_or_else(|| IdParseError::MissingDelimiter(s.to_string()))?;
        if !prefix.eq_ignore_ascii_case(STABLE_PREFIX) {
            return Err(IdParseError::InvalidPrefix(prefix.to_string()));
        }
        let ulid = Ulid::from_string(ulid_str)
            .map_err(|e| IdParseError::InvalidUlid(ulid_str.to_string(), e.to_string()))?;
        Ok(Self(ulid))
    }
}

impl Serialize for StableId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StableId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing stable ids
#[derive(Debug, Error)]
pub enum IdParseError {
    #[error("invalid stable id prefix: '{0}' (expected STB)")]
    InvalidPrefix(String),

    #[error("missing '-' delimiter in stable id: '{0}'")]
    MissingDelimiter(String),

    #[error("invalid ULID '{0}': {1}")]
    InvalidUlid(String, String),
}

/// Compute the identity key of one item of a flat section
pub fn flat_key(section: &str, item: &Value) -> StoreResult<String> {
    if item.is_null() {
        return Err(StoreError::Validation(format!(
            "null item in section '{}'",
            section
        )));
    }

    if let (Some(rule), Some(obj)) = (sections::rule_for(section), item.as_object()) {
        let parts: Vec<String> = rule
            .identity_fields
            .iter()
            .map(|field| obj.get(*field).map(field_text).unwrap_or_default())
            .collect();
        if parts.iter().any(|p| !p.is_empty()) {
            return Ok(format!("{}:{}", section, parts.join("|")));
        }
    }

    Ok(format!("{}:#{}", section, &content_hash(item)[..16]))
}

/// Compute identity keys for all items of one sub-category of a tree section
///
/// Keys depend on the sibling list: a name shared by several siblings gets a
/// suffix derived from the long name, and when the long name does not
/// disambiguate either the suffix is the positional index.
pub fn tree_keys(
    section: &str,
    category: &str,
    subcategory: &str,
    items: &[Value],
) -> Vec<StoreResult<String>> {
    let prefix = format!(
        "{}/{}/{}",
        section,
        urlencoding::encode(category),
        urlencoding::encode(subcategory)
    );

    let names: Vec<Option<String>> = items.iter().map(skill_name).collect();
    let long_names: Vec<Option<String>> = items
        .iter()
        .map(|item| non_empty_str(item.get("long_name")))
        .collect();

    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    let mut pair_counts: HashMap<(&str, Option<&str>), usize> = HashMap::new();
    for (name, long) in names.iter().zip(&long_names) {
        if let Some(name) = name {
            *name_counts.entry(name.as_str()).or_default() += 1;
            *pair_counts
                .entry((name.as_str(), long.as_deref()))
                .or_default() += 1;
        }
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(StoreError::Validation(format!(
                    "item {} under {}/{}/{} is not an object",
                    index, section, category, subcategory
                )));
            }

            let key = match &names[index] {
                None => format!("#{}", index),
                Some(name) if name_counts[name.as_str()] == 1 => {
                    urlencoding::encode(name).into_owned()
                }
                Some(name) => {
                    let long = long_names[index].as_deref();
                    match long {
                        Some(long) if pair_counts[&(name.as_str(), Some(long))] == 1 => {
                            format!("{}~{}", urlencoding::encode(name), &hash_str(long)[..8])
                        }
                        _ => format!("{}#{}", urlencoding::encode(name), index),
                    }
                }
            };

            Ok(format!("{}/{}", prefix, key))
        })
        .collect()
}

/// Split a tree entry path into `(root, category, subcategory)`, decoded
pub fn split_tree_path(path: &str) -> Option<(String, String, String)> {
    let mut parts = path.splitn(4, '/');
    let root = parts.next()?;
    let category = urlencoding::decode(parts.next()?).ok()?;
    let subcategory = urlencoding::decode(parts.next()?).ok()?;
    parts.next()?;
    Some((root.to_string(), category.into_owned(), subcategory.into_owned()))
}

/// SHA-256 over the canonical JSON of a value, excluding its tag field
pub fn content_hash(value: &Value) -> String {
    let mut stripped = value.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove(TAG_FIELD);
    }
    hash_str(&canonical_json(&stripped))
}

/// Serialize with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn skill_name(item: &Value) -> Option<String> {
    non_empty_str(item.get("short_name")).or_else(|| non_empty_str(item.get("long_name")))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Render an identity field as text (strings trimmed, other scalars as JSON)
fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
