//! Document files and the embedded tag field
//!
//! Documents are UTF-8 JSON files, one per owner per language:
//! `<base>.json` for the default language and `<base>_<lang>.json` for the
//! others. The file stem is the owner slug.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::core::error::{StoreError, StoreResult};
use crate::core::sections::TAG_FIELD;

/// Owner identity decoded from a document filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentName {
    /// Owner slug (the file stem)
    pub slug: String,
    /// Slug shared by all language variants
    pub base_slug: String,
    pub language: String,
}

impl DocumentName {
    /// Decode a file stem using the configured languages
    pub fn parse(stem: &str, languages: &[String], default_language: &str) -> Self {
        if let Some((base, lang)) = stem.rsplit_once('_') {
            if !base.is_empty() && lang != default_language && languages.iter().any(|l| l == lang)
            {
                return Self {
                    slug: stem.to_string(),
                    base_slug: base.to_string(),
                    language: lang.to_string(),
                };
            }
        }
        Self {
            slug: stem.to_string(),
            base_slug: stem.to_string(),
            language: default_language.to_string(),
        }
    }

    /// Owner slug for a language variant of a base slug
    pub fn slug_for(base_slug: &str, language: &str, default_language: &str) -> String {
        if language == default_language {
            base_slug.to_string()
        } else {
            format!("{}_{}", base_slug, language)
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.slug)
    }
}

/// List the `*.json` documents directly inside a directory, sorted by name
pub fn list_documents(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(StoreError::not_found("documents directory", dir.display()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Read and parse one document; the root must be a JSON object
pub fn load_document(path: &Path) -> StoreResult<Value> {
    let content = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        StoreError::Validation(format!("{} is not valid JSON: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(StoreError::Validation(format!(
            "{} must contain a JSON object with one key per section",
            path.display()
        )));
    }
    Ok(value)
}

/// Write a document as pretty-printed JSON with a trailing newline
pub fn save_document(path: &Path, document: &Value) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut content = serde_json::to_string_pretty(document)?;
    content.push('\n');
    fs::write(path, content)?;
    Ok(())
}

/// Tag names embedded in a payload
///
/// The field may be absent, a single string, or an array of strings. Names
/// are trimmed, blanks dropped and duplicates removed, keeping first order.
pub fn embedded_tags(payload: &Value) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        let s = s.trim();
        if !s.is_empty() && !names.iter().any(|n| n == s) {
            names.push(s.to_string());
        }
    };
    match payload.get(TAG_FIELD) {
        Some(Value::String(s)) => push(s),
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    push(s);
                }
            }
        }
        _ => {}
    }
    names
}

pub fn has_tag_field(payload: &Value) -> bool {
    payload.get(TAG_FIELD).is_some()
}

/// Replace the embedded tag list; an empty list removes the field
///
/// Returns a validation error for payloads that are not objects, since there
/// is nowhere to embed the list.
pub fn set_embedded_tags(payload: &mut Value, names: &[String]) -> StoreResult<()> {
    let obj = payload.as_object_mut().ok_or_else(|| {
        StoreError::Validation("cannot embed tags in a payload that is not an object".into())
    })?;
    if names.is_empty() {
        obj.remove(TAG_FIELD);
    } else {
        obj.insert(
            TAG_FIELD.to_string(),
            Value::Array(names.iter().cloned().map(Value::String).collect()),
        );
    }
    Ok(())
}

/// Order `current` names: those already in `existing` keep their position,
/// new names are appended alphabetically
pub fn merge_tag_order(existing: &[String], current: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing
        .iter()
        .filter(|name| current.contains(name))
        .cloned()
        .collect();
    let mut added: Vec<String> = current
        .iter()
        .filter(|name| !existing.contains(name))
        .cloned()
        .collect();
    added.sort();
    added.dedup();
    merged.extend(added);
    merged
}
