//! Configuration management with layered hierarchy

use serde::Deserialize;
use std::path::PathBuf;

use crate::core::Project;

/// Languages every linked entry is created in unless configured otherwise
const DEFAULT_LANGUAGES: &[&str] = &["en", "de", "fa"];
const DEFAULT_LANGUAGE: &str = "en";

/// cvdb configuration with layered hierarchy
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configured document languages
    pub languages: Option<Vec<String>>,

    /// Language whose documents carry no filename suffix
    pub default_language: Option<String>,

    /// Directory holding source documents, relative to the project root
    pub documents_dir: Option<PathBuf>,

    /// Directory exports are written to, relative to the project root
    pub output_dir: Option<PathBuf>,

    /// Back up replaced data before an overwriting import
    pub backup_on_overwrite: Option<bool>,
}

/// Resolved language settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Languages {
    pub default: String,
    /// All languages, default first
    pub all: Vec<String>,
}

impl Languages {
    pub fn new(default: &str, others: &[String]) -> Self {
        let default = default.trim().to_lowercase();
        let mut all = vec![default.clone()];
        for lang in others {
            let lang = lang.trim().to_lowercase();
            if !lang.is_empty() && !all.contains(&lang) {
                all.push(lang);
            }
        }
        Self { default, all }
    }

    pub fn contains(&self, language: &str) -> bool {
        self.all.iter().any(|l| l == language)
    }
}

impl Default for Languages {
    fn default() -> Self {
        let others: Vec<String> = DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect();
        Self::new(DEFAULT_LANGUAGE, &others)
    }
}

impl Config {
    /// Load configuration from all sources, merging in priority order
    pub fn load(project: Option<&Project>) -> Self {
        let mut config = Config::default();

        // 1. Built-in defaults (applied by the accessors)

        // 2. Global user config (~/.config/cvdb/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::read_file(&global_path) {
                config.merge(global);
            }
        }

        // 3. Project config (.cvdb/config.yaml)
        if let Some(project) = project {
            if let Some(project_config) = Self::read_file(&project.config_path()) {
                config.merge(project_config);
            }
        }

        // 4. Environment variables
        config.apply_env(|key| std::env::var(key).ok());

        config
    }

    fn read_file(path: &std::path::Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_yml::from_str::<Config>(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
                None
            }
        }
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cvdb")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Apply `CVDB_*` overrides through the given lookup
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(languages) = lookup("CVDB_LANGUAGES") {
            let list: Vec<String> = languages
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !list.is_empty() {
                self.languages = Some(list);
            }
        }
        if let Some(default) = lookup("CVDB_DEFAULT_LANGUAGE") {
            if !default.trim().is_empty() {
                self.default_language = Some(default);
            }
        }
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        if other.languages.is_some() {
            self.languages = other.languages;
        }
        if other.default_language.is_some() {
            self.default_language = other.default_language;
        }
        if other.documents_dir.is_some() {
            self.documents_dir = other.documents_dir;
        }
        if other.output_dir.is_some() {
            self.output_dir = other.output_dir;
        }
        if other.backup_on_overwrite.is_some() {
            self.backup_on_overwrite = other.backup_on_overwrite;
        }
    }

    /// Resolved language settings
    pub fn languages(&self) -> Languages {
        let default = self
            .default_language
            .as_deref()
            .unwrap_or(DEFAULT_LANGUAGE);
        match &self.languages {
            Some(list) => Languages::new(default, list),
            None => {
                let others: Vec<String> =
                    DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect();
                Languages::new(default, &others)
            }
        }
    }

    /// Documents directory of a project
    pub fn documents_dir(&self, project: &Project) -> PathBuf {
        match &self.documents_dir {
            Some(dir) => project.root().join(dir),
            None => project.documents_dir(),
        }
    }

    /// Export directory of a project
    pub fn output_dir(&self, project: &Project) -> PathBuf {
        match &self.output_dir {
            Some(dir) => project.root().join(dir),
            None => project.output_dir(),
        }
    }

    pub fn backup_on_overwrite(&self) -> bool {
        self.backup_on_overwrite.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_languages() {
        let langs = Config::default().languages();
        assert_eq!(langs.default, "en");
        assert_eq!(langs.all, vec!["en", "de", "fa"]);
    }

    #[test]
    fn test_default_language_always_first() {
        let config = Config {
            languages: Some(vec!["de".into(), "fr".into(), "DE".into()]),
            default_language: Some("fr".into()),
            ..Default::default()
        };
        assert_eq!(config.languages().all, vec!["fr", "de"]);
    }

    #[test]
    fn test_yaml_and_merge_order() {
        let mut config: Config = serde_yml::from_str(
            "languages: [en, de]\ndocuments_dir: cvs\nbackup_on_overwrite: false\n",
        )
        .unwrap();
        config.merge(Config {
            output_dir: Some("build".into()),
            ..Default::default()
        });
        assert_eq!(config.documents_dir, Some(PathBuf::from("cvs")));
        assert_eq!(config.output_dir, Some(PathBuf::from("build")));
        assert!(!config.backup_on_overwrite());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CVDB_LANGUAGES", "en, es ,"),
            ("CVDB_DEFAULT_LANGUAGE", "es"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        let langs = config.languages();
        assert_eq!(langs.default, "es");
        assert_eq!(langs.all, vec!["es", "en"]);
    }
}
