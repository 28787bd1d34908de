//! cvdb: relational store for structured CV documents
//!
//! Imports per-owner, per-language JSON documents into SQLite, keeps a tag
//! catalog consistent with the tags embedded in each entry, links
//! translations of one logical entry across languages, and exports
//! documents back with or without the current tag state applied.

pub mod cli;
pub mod core;
