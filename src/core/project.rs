//! Project discovery and structure

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project metadata directory
const PROJECT_DIR: &str = ".cvdb";

/// Represents a cvdb project
#[derive(Debug)]
pub struct Project {
    /// Root directory of the project (parent of .cvdb/)
    root: PathBuf,
}

impl Project {
    /// Find project root by walking up from the current directory
    pub fn discover() -> Result<Self, ProjectError> {
        let current = std::env::current_dir()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find project root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        loop {
            if current.join(PROJECT_DIR).is_dir() {
                return Ok(Self { root: current });
            }

            if !current.pop() {
                return Err(ProjectError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Create a new project structure at the given path
    pub fn init(path: &Path) -> Result<Self, ProjectError> {
        let root = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        if root.join(PROJECT_DIR).exists() {
            return Err(ProjectError::AlreadyExists(root));
        }

        Self::init_force(&root)
    }

    /// Force initialization even if .cvdb/ exists
    ///
    /// Rewrites the default config; an existing store file is left alone.
    pub fn init_force(path: &Path) -> Result<Self, ProjectError> {
        let root = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let project = Self { root };

        for dir in [
            project.backup_dir(),
            project.documents_dir(),
            project.output_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ProjectError::IoError(e.to_string()))?;
        }

        std::fs::write(project.config_path(), Self::default_config())
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        Ok(project)
    }

    fn default_config() -> &'static str {
        r#"# cvdb project configuration

# Languages every linked entry is created in (default language first)
languages: [en, de, fa]

# Language whose documents have no filename suffix
default_language: en

# Where source documents live and where exports go (relative to this project)
# documents_dir: data
# output_dir: out

# Back up replaced data before `cvdb import --overwrite`
# backup_on_overwrite: true
"#
    }

    /// Get the project root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the .cvdb metadata directory
    pub fn cvdb_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.cvdb_dir().join("config.yaml")
    }

    /// Path of the SQLite store
    pub fn store_path(&self) -> PathBuf {
        self.cvdb_dir().join("cv.db")
    }

    /// Directory for pre-overwrite backups
    pub fn backup_dir(&self) -> PathBuf {
        self.cvdb_dir().join("backups")
    }

    /// Default documents directory
    pub fn documents_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Default export directory
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("out")
    }
}

/// Errors that can occur during project operations
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("not a cvdb project (searched from {searched_from:?}). Run 'cvdb init' to create one.")]
    NotFound { searched_from: PathBuf },

    #[error("cvdb project already exists at {0:?}")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    IoError(String),
}
