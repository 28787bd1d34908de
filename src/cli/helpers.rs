//! Shared helper functions for CLI commands
//!
//! Project and store opening, JSON argument parsing and table formatting
//! used by several command modules.

use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use serde_json::Value;
use tabled::{builder::Builder, settings::Style};

use crate::cli::args::{GlobalOpts, OutputFormat};
use crate::core::{Config, CvStore, Project};

/// Attempts made by read-only commands when the store is locked
pub const READ_ATTEMPTS: u32 = 3;

/// Find the project from `--project` or the current directory
pub fn discover_project(global: &GlobalOpts) -> Result<Project> {
    let project = match &global.project {
        Some(path) => Project::discover_from(path),
        None => Project::discover(),
    };
    project.map_err(|e| miette::miette!("{}", e))
}

/// Open the project, its layered config and its store
pub fn open(global: &GlobalOpts) -> Result<(Project, Config, CvStore)> {
    let project = discover_project(global)?;
    let config = Config::load(Some(&project));
    let store = CvStore::open_project(&project)?;
    Ok((project, config, store))
}

/// Parse a JSON argument; `@path` reads the JSON from a file
pub fn parse_json_arg(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).into_diagnostic()?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| miette::miette!("invalid JSON data: {}", e))
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

/// Render rows as a table in the requested format
pub fn render_table(format: OutputFormat, header: &[&str], rows: Vec<Vec<String>>) -> String {
    match format {
        OutputFormat::Tsv => {
            let mut out = header.join("\t");
            for row in rows {
                out.push('\n');
                out.push_str(&row.iter().map(|c| escape_tsv(c)).collect::<Vec<_>>().join("\t"));
            }
            out
        }
        _ => {
            let mut builder = Builder::default();
            builder.push_record(header.iter().copied());
            for row in rows {
                builder.push_record(row);
            }
            let mut table = builder.build();
            if format == OutputFormat::Md {
                table.with(Style::markdown());
            } else {
                table.with(Style::rounded());
            }
            table.to_string()
        }
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Replace tabs and newlines so a value stays in its TSV cell
pub fn escape_tsv(s: &str) -> String {
    s.replace('\t', " ").replace('\n', " ")
}
