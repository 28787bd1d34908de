//! CLI command implementations

pub mod completions;
pub mod diff;
pub mod doctor;
pub mod entry;
pub mod export;
pub mod import;
pub mod init;
pub mod list;
pub mod tag;
