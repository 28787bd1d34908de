//! Core module - store, identity rules and engine operations

pub mod config;
pub mod doctor;
pub mod document;
pub mod error;
pub mod identity;
pub mod multilang;
pub mod pipeline;
pub mod project;
pub mod sections;
pub mod store;
pub mod tags;

pub use config::{Config, Languages};
pub use doctor::DoctorReport;
pub use document::DocumentName;
pub use error::{StoreError, StoreResult};
pub use identity::{IdParseError, StableId};
pub use multilang::{LinkedGroup, UpdateReport};
pub use pipeline::{ExportReport, ImportOptions, ImportReport, TagMode};
pub use project::{Project, ProjectError};
pub use store::{CvStore, Entry, EntryId, EntryKind};
pub use tags::{CleanupReport, DeleteTagReport};
