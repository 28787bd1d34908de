//! `cvdb diff` command - Compare documents on disk with stored state

use console::style;
use miette::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::helpers::{open, print_json, READ_ATTEMPTS};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::document::{list_documents, load_document, DocumentName};
use crate::core::pipeline::DocumentDiff;
use crate::core::store::retry_on_busy;

#[derive(clap::Args, Debug)]
pub struct DiffArgs {
    /// Documents directory (default: configured documents_dir, or data/)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Only compare documents of this owner (slug or base slug)
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Serialize)]
struct FileDiff {
    path: PathBuf,
    #[serde(flatten)]
    diff: DocumentDiff,
}

pub fn run(args: DiffArgs, global: &GlobalOpts) -> Result<()> {
    let (project, config, store) = open(global)?;
    let dir = args.dir.clone().unwrap_or_else(|| config.documents_dir(&project));
    let languages = config.languages();

    let mut diffs = Vec::new();
    for path in list_documents(&dir)? {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let name = DocumentName::parse(&stem, &languages.all, &languages.default);
        if let Some(filter) = &args.owner {
            if name.slug != *filter && name.base_slug != *filter {
                continue;
            }
        }
        let document = load_document(&path)?;
        let diff = retry_on_busy(READ_ATTEMPTS, || store.diff_document(&name.slug, &document))?;
        diffs.push(FileDiff { path, diff });
    }

    if global.format == OutputFormat::Json {
        return print_json(&diffs);
    }

    if diffs.is_empty() {
        println!("{} No documents found in {}", style("!").yellow(), dir.display());
        return Ok(());
    }

    for FileDiff { path, diff } in &diffs {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if diff.is_empty() && diff.errors.is_empty() {
            if !global.quiet {
                println!(
                    "{} {} matches the store ({} entries)",
                    style("✓").green(),
                    style(&name).cyan(),
                    diff.unchanged
                );
            }
            continue;
        }

        println!(
            "{} {}{}",
            style("~").yellow(),
            style(&name).cyan(),
            if diff.new_owner {
                style(" (new owner)").dim().to_string()
            } else {
                String::new()
            }
        );
        for key in &diff.added {
            println!("  {} {}", style("+").green(), key);
        }
        for key in &diff.changed {
            println!("  {} {}", style("~").yellow(), key);
        }
        for key in &diff.removed {
            println!("  {} {}", style("-").red(), key);
        }
        for err in &diff.errors {
            println!("  {} {}: {}", style("✗").red(), err.location, err.message);
        }
    }

    Ok(())
}
