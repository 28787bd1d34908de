//! Per-section rule tables
//!
//! Section-specific behavior lives here as static data rather than in
//! per-section types:
//! - which fields make up an entry's identity key
//! - which fields are shared across languages (everything else is text)
//! - which sections are tree-shaped (category / sub-category / items)

/// Document field that carries an entry's tag list
pub const TAG_FIELD: &str = "type_key";

/// Rules for one flat section
#[derive(Debug, Clone, Copy)]
pub struct SectionRule {
    pub name: &'static str,
    /// Near-immutable fields concatenated into the identity key
    pub identity_fields: &'static [&'static str],
    /// Fields copied verbatim to every language variant
    pub shared_fields: &'static [&'static str],
}

const SECTION_RULES: &[SectionRule] = &[
    SectionRule {
        name: "projects",
        identity_fields: &["title", "url"],
        shared_fields: &["github", "technologies"],
    },
    SectionRule {
        name: "experiences",
        identity_fields: &["role", "institution", "duration"],
        shared_fields: &["website"],
    },
    SectionRule {
        name: "publications",
        identity_fields: &["title", "year"],
        shared_fields: &["year", "doi", "authors", "isbn"],
    },
    SectionRule {
        name: "references",
        identity_fields: &["name", "email"],
        shared_fields: &["email", "phone"],
    },
    SectionRule {
        name: "education",
        identity_fields: &["degree", "institution", "duration"],
        shared_fields: &["gpa"],
    },
    SectionRule {
        name: "languages",
        identity_fields: &["language"],
        shared_fields: &["level", "cefr"],
    },
    SectionRule {
        name: "profiles",
        identity_fields: &["network", "url"],
        shared_fields: &["network", "username"],
    },
    SectionRule {
        name: "certifications",
        identity_fields: &["title", "issuer"],
        shared_fields: &["credential_id", "issuer"],
    },
    SectionRule {
        name: "skills",
        identity_fields: &[],
        shared_fields: &["level", "years"],
    },
];

/// Fields shared by every section: URLs, dates, tags and identifiers
const COMMON_SHARED_FIELDS: &[&str] = &[
    TAG_FIELD,
    "id",
    "url",
    "date",
    "start_date",
    "end_date",
    "duration",
];

/// Sections stored as category / sub-category / item trees
const TREE_SECTIONS: &[&str] = &["skills"];

/// Classification of a payload field for multi-language sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// Identical in every language variant
    Shared,
    /// Differs per language and needs translation
    Text,
}

/// Look up the rule for a section, accepting a synthetic tree path
pub fn rule_for(section: &str) -> Option<&'static SectionRule> {
    let root = root_section(section);
    SECTION_RULES.iter().find(|rule| rule.name == root)
}

/// Top-level section name of a (possibly synthetic) section path
pub fn root_section(section: &str) -> &str {
    section.split('/').next().unwrap_or(section)
}

pub fn is_tree_section(section: &str) -> bool {
    TREE_SECTIONS.contains(&root_section(section))
}

/// Classify a field of the given section
pub fn classify(section: &str, field: &str) -> FieldClass {
    if COMMON_SHARED_FIELDS.contains(&field) {
        return FieldClass::Shared;
    }
    match rule_for(section) {
        Some(rule) if rule.shared_fields.contains(&field) => FieldClass::Shared,
        _ => FieldClass::Text,
    }
}

/// All fields classified as shared for a section
pub fn shared_fields(section: &str) -> Vec<&'static str> {
    let mut fields: Vec<&'static str> = COMMON_SHARED_FIELDS.to_vec();
    if let Some(rule) = rule_for(section) {
        for field in rule.shared_fields {
            if !fields.contains(field) {
                fields.push(field);
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_fields_are_shared_everywhere() {
        assert_eq!(classify("projects", "url"), FieldClass::Shared);
        assert_eq!(classify("unknown_section", TAG_FIELD), FieldClass::Shared);
        assert_eq!(classify("education", "end_date"), FieldClass::Shared);
    }

    #[test]
    fn test_text_fields() {
        assert_eq!(classify("projects", "title"), FieldClass::Text);
        assert_eq!(classify("projects", "description"), FieldClass::Text);
        assert_eq!(classify("languages", "language"), FieldClass::Text);
    }

    #[test]
    fn test_tree_paths_use_root_rule() {
        assert!(is_tree_section("skills"));
        assert!(is_tree_section("skills/Programming/Languages/Rust"));
        assert!(!is_tree_section("projects"));
        assert_eq!(classify("skills/A/B/C", "level"), FieldClass::Shared);
    }

    #[test]
    fn test_shared_fields_has_no_duplicates() {
        let fields = shared_fields("profiles");
        assert!(fields.contains(&"network"));
        assert_eq!(fields.iter().filter(|f| **f == "url").count(), 1);
    }
}
