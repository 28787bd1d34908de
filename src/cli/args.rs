//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    completions::CompletionsArgs, diff::DiffArgs, doctor::DoctorArgs, entry::EntryCommands,
    export::ExportArgs, import::ImportArgs, init::InitArgs, list::ListArgs, tag::TagCommands,
};

#[derive(Parser)]
#[command(name = "cvdb")]
#[command(author, version, about = "Relational store for structured CV documents")]
#[command(long_about = "Imports per-owner JSON CV documents into a SQLite store, manages a shared tag catalog, links translations across languages and exports documents back.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug logging)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Project root (default: auto-detect by finding .cvdb/)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new cvdb project
    Init(InitArgs),

    /// Import documents into the store
    Import(ImportArgs),

    /// Export owners back to documents
    Export(ExportArgs),

    /// Compare documents on disk with stored state
    Diff(DiffArgs),

    /// List owners or tags
    List(ListArgs),

    /// Check store consistency
    Doctor(DoctorArgs),

    /// Tag catalog management
    #[command(subcommand)]
    Tag(TagCommands),

    /// Entry and translation management
    #[command(subcommand)]
    Entry(EntryCommands),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Auto,
    /// JSON format (for programming)
    Json,
    /// Tab-separated values (for piping)
    Tsv,
    /// Markdown tables
    Md,
}
